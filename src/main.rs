use cilantro::{demo, jit, types};
use cilantro_jit::{JitDriver, Runtime};
use cilantro_mir::GlobalLinker;
use cilantro_types::{Universe, bootstrap};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cilantro", about = "A CLI managed-runtime core with a CIL-to-MIR JIT")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the corlib and the demo assembly, JIT everything, run Main.
    Run,
    /// Dump the loaded type universe and the demo assembly's CIL.
    Dump,
}

fn load_universe() -> Result<(Arc<Universe>, types::AssemblyId, types::AssemblyId), Box<dyn std::error::Error>>
{
    let universe = Arc::new(Universe::new());
    let corlib = universe.load_assembly(bootstrap::corlib())?;
    let demo = universe.load_assembly(demo::records())?;
    Ok((universe, corlib, demo))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run => {
            let (universe, corlib, demo_asm) = load_universe()?;
            let linker = GlobalLinker::new();
            let runtime = Runtime::new(universe.clone());
            runtime.install(&linker);

            let driver = JitDriver::new(&universe, &linker, &runtime);
            driver.jit_assembly(corlib)?;
            let program = driver.jit_assembly(demo_asm)?;

            let program_type = universe
                .find_type(demo_asm, demo::PROGRAM_NAMESPACE, demo::PROGRAM_TYPE)
                .ok_or("demo entry type missing")?;
            let main = universe
                .with_type(program_type, |t| t.methods.clone())
                .into_iter()
                .find(|&m| universe.method_name(m) == demo::MAIN_METHOD)
                .ok_or("demo entry method missing")?;

            let (exception, value) = driver.call_method(&program, main, &[])?;
            info!(?exception, ?value, "entrypoint returned");
            println!(
                "Main returned {:?} (exception slot {:?})",
                value, exception
            );
        }
        Command::Dump => {
            let (universe, corlib, demo_asm) = load_universe()?;
            let mut out = String::new();
            universe.dump_assembly(corlib, &mut out);
            universe.dump_assembly(demo_asm, &mut out);
            print!("{out}");

            for ty in universe.with_assembly(demo_asm, |a| a.defined_types.clone()) {
                for method in universe.with_type(ty, |t| t.methods.clone()) {
                    println!("\n{}:", universe.method_symbol(method));
                    print!("{}", jit::disassemble(&universe, method)?);
                }
            }
        }
    }
    Ok(())
}
