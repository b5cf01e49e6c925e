use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pmuset::error::{EXIT_FAILURE, EXIT_PRIVILEGE};
use pmuset::report::{self, OutputFormat};
use pmuset::{
    AccessError, BatchRunner, ChangeSet, CoreSelection, FailurePolicy, FieldChange, MsrAccess,
    MsrDevice, PmuError, SimulatedMsr, Topology,
};
use pmuset_raw::perfmon::{msr, MAX_PMU_COUNTERS};
use pmuset_raw::DEFAULT_MSR_ROOT;

#[derive(Parser, Debug)]
#[command(name = "pmuset", version)]
#[command(about = "Inspect and configure Intel core performance counters through the msr driver")]
struct Args {
    #[arg(
        short = 'c',
        long = "core",
        default_value = "all",
        help = "Cores to operate on: 'all', a single index or a list such as 0-3,6"
    )]
    core: CoreSelection,

    #[arg(long, conflicts_with = "disable_fix", help = "Enable the three fixed counters")]
    enable_fix: bool,

    #[arg(long, help = "Disable the three fixed counters")]
    disable_fix: bool,

    #[arg(
        long,
        conflicts_with = "disable_pmu",
        help = "Enable general-purpose counters (all, or the one given by --pmu-number)"
    )]
    enable_pmu: bool,

    #[arg(long, help = "Disable general-purpose counters (all, or the one given by --pmu-number)")]
    disable_pmu: bool,

    #[arg(short = 'p', long = "pmu-number", help = "General-purpose counter index")]
    pmu_number: Option<usize>,

    #[arg(
        short = 'e',
        long = "pmu-event",
        value_name = "CODE|NAME",
        help = "Event code (decimal or 0x hex) or architectural event name, e.g. LLCMisses"
    )]
    pmu_event: Option<String>,

    #[arg(
        short = 'u',
        long = "pmu-umask",
        value_name = "CODE",
        help = "Unit mask (decimal or 0x hex); requires --pmu-event"
    )]
    pmu_umask: Option<String>,

    #[arg(
        short = 'r',
        long,
        conflicts_with_all = [
            "enable_fix",
            "disable_fix",
            "enable_pmu",
            "disable_pmu",
            "pmu_number",
            "pmu_event",
            "pmu_umask",
        ],
        help = "Disable all counters and clear their control registers"
    )]
    reset: bool,

    #[arg(long, help = "Include raw counter values when dumping state")]
    counters: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table, help = "Output format")]
    format: OutputFormat,

    #[arg(long, help = "Continue with the remaining cores after a core fails")]
    keep_going: bool,

    #[arg(
        long,
        env = "PMUSET_MSR_ROOT",
        default_value = DEFAULT_MSR_ROOT,
        help = "Directory holding <core>/msr device nodes"
    )]
    msr_root: PathBuf,

    #[arg(long, help = "Operate on in-memory registers instead of hardware")]
    simulate: bool,

    #[arg(
        long = "pmu-count",
        help = "Override the CPUID-reported number of general-purpose counters"
    )]
    pmu_count: Option<usize>,

    #[arg(short, long, help = "Enable verbose logging (shows every MSR read/write)")]
    verbose: bool,
}

impl Args {
    fn change_set(&self) -> pmuset::Result<ChangeSet> {
        ChangeSet {
            fixed: FieldChange::from_flags(self.enable_fix, self.disable_fix),
            pmu: FieldChange::from_flags(self.enable_pmu, self.disable_pmu),
            pmu_index: self.pmu_number,
            reset: self.reset,
            ..Default::default()
        }
        .with_event_text(self.pmu_event.as_deref(), self.pmu_umask.as_deref())
    }

    fn policy(&self) -> FailurePolicy {
        if self.keep_going {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Probe one register so a missing driver or missing privilege is reported
/// once, before any core is modified
fn check_permissions(root: &Path, core: u32) -> pmuset::Result<()> {
    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("Not running as root, MSR access will most likely be denied");
    }

    pmuset_raw::read_msr(root, core, msr::IA32_PERF_GLOBAL_CTRL)
        .map(|_| ())
        .map_err(|e| AccessError::classify(core, msr::IA32_PERF_GLOBAL_CTRL, e).into())
}

fn detect_topology(args: &Args) -> anyhow::Result<Topology> {
    if let Some(n) = args.pmu_count {
        if n == 0 || n > MAX_PMU_COUNTERS {
            return Err(PmuError::invalid(format!(
                "--pmu-count must be between 1 and {MAX_PMU_COUNTERS}, got {n}"
            ))
            .into());
        }
    }

    match Topology::detect(args.pmu_count) {
        Ok(topology) => Ok(topology),
        Err(e) if args.simulate => {
            tracing::warn!("{}; simulating a single core", e);
            Ok(Topology::uniform(1, args.pmu_count.unwrap_or(MAX_PMU_COUNTERS)))
        }
        Err(e) => Err(e).context("cannot determine CPU topology"),
    }
}

fn execute<A: MsrAccess + ?Sized>(
    access: &A,
    topology: &Topology,
    changes: &ChangeSet,
    cores: &[u32],
    args: &Args,
) -> anyhow::Result<ExitCode> {
    let runner = BatchRunner::new(access, topology);

    if changes.is_inspection() {
        let reports = runner
            .inspect(cores, args.counters)
            .context("failed to read counter state")?;
        let text = report::render_inspection(&reports, args.format)?;
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
        return Ok(ExitCode::SUCCESS);
    }

    let batch = runner.run(changes, cores, args.policy())?;
    print!("{}", report::render_batch(&batch, args.format)?);
    if args.format == OutputFormat::Json {
        println!();
    }

    Ok(ExitCode::from(batch.exit_code()))
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let changes = args.change_set()?;
    let topology = detect_topology(args)?;
    changes.validate(&topology)?;
    let cores = args.core.resolve(&topology)?;

    tracing::debug!("Selected cores: {}", pmuset::config::format_cpu_list(&cores));

    if args.simulate {
        tracing::info!("Simulating registers, no hardware is touched");
        let sim = SimulatedMsr::new(&topology);
        return execute(&sim, &topology, &changes, &cores, args);
    }

    let first = cores.first().copied().unwrap_or_default();
    check_permissions(&args.msr_root, first).with_context(|| {
        format!(
            "cannot access MSRs under {} (run as root after 'modprobe msr')",
            args.msr_root.display()
        )
    })?;

    let device = MsrDevice::new(args.msr_root.clone(), &topology);
    execute(&device, &topology, &changes, &cores, args)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            let code = err
                .downcast_ref::<PmuError>()
                .map_or(EXIT_FAILURE, PmuError::exit_code);
            tracing::error!("{:#}", err);
            if code == EXIT_PRIVILEGE {
                tracing::error!("Load the msr kernel module and run pmuset as root");
            }
            ExitCode::from(code)
        }
    }
}
