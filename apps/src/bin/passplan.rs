use anyhow::{ensure, Context, Result};
use passplan_planning::{session, AttributeSet, Cfg, Planner, StepStore};
use std::fmt::Formatter;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;

/// Compiles an ordered, cost-minimised test pass from a library of step
/// records and an initial world-state.
#[derive(Debug, StructOpt)]
#[structopt(name = "passplan", rename_all = "kebab-case")]
struct Opt {
    /// Step record files, one record per file.
    files: Vec<PathBuf>,

    /// Initial world-state as a comma-separated attribute list.
    #[structopt(long, short, default_value = "")]
    state: String,

    /// Resume from a run log: start from its last recorded state and drop
    /// the required flag on steps it lists as already executed. Overrides
    /// --state.
    #[structopt(long)]
    resume: Option<PathBuf>,

    /// If a plan is found, it will also be written to the indicated file.
    #[structopt(short = "p", long = "plan")]
    plan_file: Option<PathBuf>,

    /// Logging level to use: one of "error", "warn", "info", "debug", "trace"
    #[structopt(short, long, default_value = "info")]
    log_level: tracing::Level,
}

fn main() {
    let opt = Opt::from_args();
    if let Err(e) = run(opt) {
        eprintln!("ERROR: {e:#}");
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::Uptime::from(std::time::Instant::now()))
        .with_writer(std::io::stderr)
        .with_max_level(opt.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    ensure!(!opt.files.is_empty(), "no step record files given");

    let start_time = std::time::Instant::now();
    let mut store = StepStore::new();
    for file in &opt.files {
        let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
        store
            .add_text(&text)
            .with_context(|| format!("parsing step record {}", file.display()))?;
    }

    let mut initial: AttributeSet = opt.state.parse().context("parsing --state")?;
    if let Some(log_file) = &opt.resume {
        let text = fs::read_to_string(log_file).with_context(|| format!("reading {}", log_file.display()))?;
        let resume = session::parse_log(&text);
        tracing::info!(state = %resume.state, "resuming from run log");
        for short in resume.completed() {
            store.mark_required(short, false);
        }
        initial = resume.state;
    }

    let required = store.required_steps().len();
    let planner = Planner::new(Cfg::default());
    let plan = planner.calculate(&store, &initial)?;

    print!("{}", plan.display(&store));
    if let Some(plan_file) = &opt.plan_file {
        let mut output = fs::File::create(plan_file)
            .with_context(|| format!("Option -p failed to create file {}", plan_file.display()))?;
        write!(output, "{}", plan.display(&store)).context("Error while writing plan.")?;
    }

    let summary = Summary {
        steps: plan.len(),
        required,
        cost: plan.cost(),
        runtime: start_time.elapsed(),
    };
    println!("{summary}");
    Ok(())
}

struct Summary {
    steps: usize,
    required: usize,
    cost: u32,
    runtime: std::time::Duration,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[summary] steps:{} required:{} cost:{} runtime:{}ms",
            self.steps,
            self.required,
            self.cost,
            self.runtime.as_millis()
        )
    }
}
