use action_memory::config::EngineConfig;
use action_memory::matcher::{find_current_node_matches, find_relevant_workflows};
use action_memory::predictor::{format_context, predict_future_nodes};
use action_memory::ui::{BBox, UiElement};
use action_memory::{logging, WorkflowMemory};
use anyhow::Context;
use std::path::PathBuf;

const USAGE: &str = "usage: inspect-memory [--dir DIR] [--tag TAG] [APP [CONTENT ...]]";

struct Args {
    dir: Option<PathBuf>,
    tag: Option<String>,
    app: Option<String>,
    contents: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        dir: None,
        tag: None,
        app: None,
        contents: Vec::new(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--dir" => args.dir = Some(PathBuf::from(it.next().context(USAGE)?)),
            "--tag" => args.tag = Some(it.next().context(USAGE)?),
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ if args.app.is_none() => args.app = Some(arg),
            _ => args.contents.push(arg),
        }
    }
    Ok(args)
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let args = parse_args()?;
    let config = EngineConfig::from_env();
    let dir = args.dir.unwrap_or(config.memory_dir);

    let mut memory = WorkflowMemory::new();
    let summary = memory
        .load_from_dir(&dir, args.tag.as_deref())
        .with_context(|| format!("loading memory from {}", dir.display()))?;

    println!("📂 Memory at {}", dir.display());
    println!(
        "   match threshold {}, up to {} predicted nodes",
        action_memory::ELEMENTS_MATCH_THRESHOLD,
        action_memory::MAX_SPECULATIVE_NODES
    );
    println!(
        "   {} graphs, {} nodes, {} workflows ({} skipped)",
        summary.graphs, summary.nodes, summary.workflows, summary.skipped_workflows
    );
    for graph in memory.graphs() {
        let actions: usize = graph.nodes().map(|n| n.actions.len()).sum();
        println!("   - {}: {} nodes, {} actions", graph.app, graph.len(), actions);
    }
    for wf in memory.workflows() {
        println!("   • [{}] {} ({} steps): {}", wf.tag, wf.id, wf.len(), wf.task);
    }

    let Some(app) = args.app else {
        return Ok(());
    };

    // Elements given on the command line carry no geometry.
    let live: Vec<UiElement> = args
        .contents
        .iter()
        .map(|c| UiElement::new(c.as_str(), BBox::default()))
        .collect();

    let relevant = find_relevant_workflows(&memory, &app);
    println!("\n🔎 {} relevant workflows for '{}'", relevant.len(), app);
    match find_current_node_matches(&memory, &live, &relevant) {
        Some(best) => {
            println!(
                "   best match: workflow {} position {} (similarity {:.3})",
                best.workflow_id, best.position, best.similarity
            );
            let nodes = predict_future_nodes(&memory, &best);
            println!("   {} predicted nodes\n", nodes.len());
            println!("{}", format_context(&nodes));
        }
        None => println!("   no recorded node matches"),
    }

    Ok(())
}
