use clap::Parser;
use std::path::PathBuf;

use streamfuse::catalog::OperatorCatalog;
use streamfuse::config::{DebugConfig, FusionConfig};
use streamfuse::dot::emit_dot;
use streamfuse::manifest::GraphManifest;
use streamfuse::optimize::FusionOptimizer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Mode {
    /// Feedback-aware two-phase optimizer
    Graph,
    /// Sliding-window optimizer for graphs without feedback
    Linear,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Emit {
    Report,
    Json,
    Dot,
    Manifest,
}

#[derive(Parser, Debug)]
#[command(
    name = "sfuse",
    version,
    about = "Stream fusion optimizer — merges adjacent operators of a JSON stream graph"
)]
struct Cli {
    /// Input graph manifest (.json)
    source: PathBuf,

    /// Optimizer configuration file (.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Graph)]
    mode: Mode,

    /// Output format
    #[arg(long, value_enum, default_value_t = Emit::Report)]
    emit: Emit,

    /// Print every fusion decision to stderr
    #[arg(long)]
    debug: bool,

    /// Permit forced fusion of unsafe edges
    #[arg(long)]
    allow_unsafe: bool,

    /// Fuse an edge before optimizing, ignoring the safety rules (repeatable)
    #[arg(long, value_name = "FROM:TO")]
    force: Vec<String>,

    /// Iteration cap for --mode linear
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Log optimizer progress
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("streamfuse=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("streamfuse=warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // ── Configuration ──
    let mut config = match &cli.config {
        Some(path) => match FusionConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("sfuse: error: {}", e);
                std::process::exit(2);
            }
        },
        None => FusionConfig::default(),
    };
    if cli.debug {
        config.debug = DebugConfig::buffered();
    }
    if cli.allow_unsafe {
        config.allow_unsafe = true;
    }
    if let Some(cap) = cli.max_iterations {
        config.max_linear_iterations = cap;
    }

    // ── Load graph ──
    let manifest = match GraphManifest::load(&cli.source) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("sfuse: error: {}", e);
            std::process::exit(2);
        }
    };
    let mut graph = match manifest.build(&OperatorCatalog::standard()) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("sfuse: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    if cli.verbose {
        eprintln!(
            "sfuse: loaded {} nodes, {} edges from {}",
            graph.len(),
            graph.edge_count(),
            cli.source.display()
        );
    }

    let optimizer = FusionOptimizer::new(config);

    // ── Forced fusions ──
    for spec in &cli.force {
        let Some((from, to)) = spec.split_once(':') else {
            eprintln!("sfuse: error: --force expects FROM:TO, got '{}'", spec);
            std::process::exit(2);
        };
        match optimizer.force_fuse(&mut graph, &from.into(), &to.into()) {
            Ok(id) => {
                if cli.verbose {
                    eprintln!("sfuse: forced {} -> {} as {}", from, to, id);
                }
            }
            Err(e) => {
                eprintln!("sfuse: error: {}", e);
                std::process::exit(1);
            }
        }
    }

    // ── Optimize ──
    let result = match cli.mode {
        Mode::Graph => optimizer.optimize(graph),
        Mode::Linear => optimizer.optimize_linear(graph),
    };
    let optimized = match result {
        Ok(o) => o,
        Err(e) => {
            eprintln!("sfuse: error: {}", e);
            std::process::exit(1);
        }
    };

    for line in &optimized.report.debug_log {
        eprintln!("sfuse: debug: {}", line);
    }

    // ── Emit ──
    let output = match cli.emit {
        Emit::Report => Ok(optimized.report.to_string()),
        Emit::Json => serde_json::to_string_pretty(&optimized.report).map_err(|e| e.to_string()),
        Emit::Dot => Ok(emit_dot(&optimized.graph)),
        Emit::Manifest => GraphManifest::from_graph(&optimized.graph)
            .to_json_pretty()
            .map_err(|e| e.to_string()),
    };
    match output {
        Ok(text) => {
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
        }
        Err(e) => {
            eprintln!("sfuse: error: {}", e);
            std::process::exit(1);
        }
    }
}
