use anyhow::Context;
use clap::{Parser, Subcommand};
use tramline_rs::process::loader::ProcessLoader;
use tramline_rs::process::resolver::ProcessResolver;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that every process in a file resolves to a valid graph
    Validate {
        /// Path to the process YAML file
        #[arg(short, long)]
        file: String,
    },
    /// Print the resolved graph of one process
    Inspect {
        /// Path to the process YAML file
        #[arg(short, long)]
        file: String,

        /// Process code to inspect
        #[arg(short, long)]
        process: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Validate { file } => {
            let parsed = ProcessLoader::new()
                .load_file(&file)
                .with_context(|| format!("Failed to load '{file}'"))?;
            let resolver = ProcessResolver::from_file(parsed);

            let mut failures = 0;
            for code in resolver.codes().await {
                match resolver.resolve(&code).await {
                    Ok(graph) => println!("ok: {} ({} tasks)", code, graph.len()),
                    Err(error) => {
                        failures += 1;
                        eprintln!("error: {error}");
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} invalid process(es)");
            }
        }
        Commands::Inspect { file, process } => {
            let parsed = ProcessLoader::new()
                .load_file(&file)
                .with_context(|| format!("Failed to load '{file}'"))?;
            let resolver = ProcessResolver::from_file(parsed);
            let graph = resolver
                .resolve(&process)
                .await
                .with_context(|| format!("Failed to resolve process '{process}'"))?;

            println!("process: {}", graph.code());
            if let Some(entry) = graph.entry_point() {
                println!("entry point: {entry}");
            }
            if let Some(end) = graph.end_point() {
                println!("end point: {end}");
            }
            println!("roots: {}", graph.roots().join(", "));

            let mut codes: Vec<&str> = graph.nodes().map(|node| node.code()).collect();
            codes.sort_unstable();
            for code in codes {
                if let Some(node) = graph.node(code) {
                    let mut line = format!("  {} [{}]", node.code(), node.service());
                    if !node.next_nodes().is_empty() {
                        line.push_str(&format!(" -> {}", node.next_nodes().join(", ")));
                    }
                    if !node.error_nodes().is_empty() {
                        line.push_str(&format!(" !> {}", node.error_nodes().join(", ")));
                    }
                    if node.in_error_branch() {
                        line.push_str(" (error branch)");
                    }
                    println!("{line}");
                }
            }
        }
    }

    Ok(())
}
