mod calendar;
mod cli;
mod dedupe;
mod engine;
mod err;
mod eval;
mod files;
mod funcs;
mod ifstack;
mod omit;
mod once;
mod queue;
mod rem;
mod solver;
mod sortbuf;
mod subst;
mod sysvars;
mod translate;
mod userfns;
mod vars;

use engine::{Engine, OutputMode};
use err::Error;
use queue::QueueOutcome;

fn run(cli: &cli::Cli) -> Result<i32, Error> {
    let repeat: u32 = match cli.repeat.as_deref() {
        Some(arg) => arg
            .trim_start_matches('*')
            .parse()
            .map_err(|_| Error::BadCommandLineArg(arg.to_owned()))?,
        None => 1,
    };
    loop {
        let mut engine = Engine::from_cli(cli)?;
        if let OutputMode::SimpleCal { level, months } = engine.mode {
            calendar::run_simple_calendar(&mut engine, level, months)?;
            return Ok(0);
        }
        let start = engine.today;
        for offset in 0..repeat.max(1) {
            engine.today = start + offset as i32;
            match engine.run_iteration() {
                Ok(()) => {}
                Err(Error::ExitRequested(code)) => return Ok(code),
                Err(err) => return Err(err),
            }
        }
        let queue_wanted = engine.mode == OutputMode::Normal
            && !cli.no_queue
            && repeat <= 1
            && (!engine.queue.is_empty() || cli.daemon.is_some());
        if !queue_wanted {
            return Ok(0);
        }
        match queue::run_queue_phase(&mut engine, cli.daemon)? {
            QueueOutcome::Done => return Ok(0),
            QueueOutcome::Exit(code) => return Ok(code),
            QueueOutcome::Reread => {
                log::info!("rereading {}", cli.filename);
            }
        }
    }
}

fn main() {
    pretty_env_logger::init();
    let cli = cli::parse_args();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("remindee: {}", err);
            std::process::exit(1);
        }
    }
}
