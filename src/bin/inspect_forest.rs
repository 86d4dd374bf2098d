//! Forest outline utility - prints each tree of a snapshot as an indented hierarchy

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use abstract_forest::forest::hierarchy::preview;
use abstract_forest::{AbstractTree, ForestSnapshot, PairId};

#[derive(Parser)]
#[command(name = "inspect_forest")]
#[command(about = "Print the Abstract hierarchy stored in a forest snapshot")]
struct Cli {
    /// Snapshot path
    #[arg(default_value = "forest.json")]
    snapshot: PathBuf,

    /// Only print the tree with this label
    #[arg(short, long)]
    tree: Option<String>,

    /// Deepest level to print
    #[arg(short, long, default_value = "3")]
    max_depth: usize,

    /// Characters of Abstract content shown per node
    #[arg(short, long, default_value = "60")]
    width: usize,
}

fn print_tree(tree: &AbstractTree, max_depth: usize, width: usize) {
    println!(
        "== {} ({} Abstracts, depth {}, {}) ==",
        tree.label(),
        tree.len(),
        tree.depth(),
        tree.strategy().as_str()
    );

    let mut stack: Vec<(PairId, usize)> = vec![(tree.root(), 0)];
    while let Some((id, depth)) = stack.pop() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let content = preview(&node.content.replace('\n', " "), width);
        println!("{}Abstract{}: {}", "  ".repeat(depth), id, content);

        let children = tree.children(id);
        if depth >= max_depth {
            if !children.is_empty() {
                println!("{}... {} more below", "  ".repeat(depth + 1), tree.descendants(id).len());
            }
            continue;
        }
        for &child in children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    println!();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let snapshot = ForestSnapshot::load(&cli.snapshot)?;
    let trees: Vec<&AbstractTree> = match &cli.tree {
        Some(label) => snapshot
            .forest
            .trees()
            .iter()
            .filter(|t| t.label() == label)
            .collect(),
        None => snapshot.forest.trees().iter().collect(),
    };
    if trees.is_empty() {
        bail!("No matching tree in {}", cli.snapshot.display());
    }

    println!(
        "Snapshot {} built {}\n",
        snapshot.build_id,
        snapshot.built_at.format("%Y-%m-%d %H:%M:%S")
    );
    for tree in trees {
        print_tree(tree, cli.max_depth, cli.width);
    }
    Ok(())
}
