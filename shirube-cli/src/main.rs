//! Shirube CLI - コマンドラインインターフェース
//!
//! デバッグセッションを1行ごとに1フレーム進める REPL

use anyhow::Result;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use shirube_core::{
    CapstoneDisassembler, Cmd, CmdKind, CmdParams, EntityKind, Session, SessionConfig,
};
use shirube_ctrl::{channel, ChannelControl, ControlPeer};
use shirube_dwarf::DwarfDebugInfo;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Shirube - native debugger session shell
#[derive(Parser)]
#[command(name = "shirube")]
#[command(version = "0.1.0")]
#[command(about = "Frame-driven debugger session shell", long_about = None)]
struct Cli {
    /// Step by instruction instead of by source line
    #[arg(long)]
    prefer_disasm: bool,

    /// Run only the selected thread while stepping
    #[arg(long)]
    solo_step: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Executable to register as a target
    binary: Option<String>,

    /// Arguments to pass to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    println!("Shirube - debugger session shell");
    println!("Version 0.1.0");
    println!();

    let (mut session, mut peer) = init_session(&cli)?;
    run_repl(&mut session, &mut peer)?;

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// セッションを作り、指定があれば実行ファイルをターゲットとして登録する
fn init_session(cli: &Cli) -> Result<(Session<ChannelControl>, ControlPeer)> {
    let config = SessionConfig {
        prefer_disassembly: cli.prefer_disasm,
        solo_stepping: cli.solo_step,
        ..SessionConfig::default()
    };
    let (control, peer) = channel();
    let disasm = CapstoneDisassembler::new()?;
    let mut session = Session::new(
        config,
        control,
        Box::new(DwarfDebugInfo::new()),
        Box::new(disasm),
    );

    if let Some(binary) = &cli.binary {
        session.push_cmd(
            CmdKind::AddTarget,
            CmdParams::new()
                .with_file_path(binary)
                .with_string(cli.args.join(" ")),
        );
        session.frame();
        println!("Target added: {}", binary);
        println!("Use 'run' to launch it");
        println!();
    }

    Ok((session, peer))
}

/// REPLループを実行する
fn run_repl(session: &mut Session<ChannelControl>, peer: &mut ControlPeer) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(shirube) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    // 空行でもフレームは進める
                    step_frame(session, peer);
                    continue;
                }

                rl.add_history_entry(line)?;

                if !handle_command(session, peer, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

/// 1行ぶんの入力を処理する。終了するときは false を返す
fn handle_command(session: &mut Session<ChannelControl>, peer: &mut ControlPeer, line: &str) -> bool {
    match line {
        "help" | "h" => print_help(),
        "quit" | "exit" | "q" => {
            println!("Goodbye!");
            return false;
        }
        "info" | "i" => print_entities(session),
        "status" => print_status(session),
        _ => match Cmd::parse(line) {
            Some(cmd) => {
                session.push(cmd);
                step_frame(session, peer);
            }
            None => {
                println!("Unknown command: {}", line);
                println!("Type 'help' for available commands.");
            }
        },
    }
    true
}

/// フレームを1つ進め、送られたメッセージとエラーを表示する
fn step_frame(session: &mut Session<ChannelControl>, peer: &mut ControlPeer) {
    session.frame();

    for msg in peer.drain_messages() {
        debug!(?msg, "control message");
        println!("-> {}", msg.name());
    }
    let output = session.take_output();
    if !output.is_empty() {
        print!("{}", output);
    }
    for error in session.take_errors() {
        eprintln!("Error: {}", error);
    }
}

fn print_status(session: &Session<ChannelControl>) {
    println!("Frame: {}", session.frame_index());
    println!("Running: {}", session.is_running());
    println!("Solo stepping: {}", session.solo_stepping());
    if let Some(stop) = session.last_stop() {
        println!("Last stop: {:?} at 0x{:x}", stop.cause, stop.vaddr);
    }
    let thread = session.selected_thread();
    if !thread.is_nil() {
        let store = session.store();
        println!(
            "Selected thread: {} (tid {}, frame {}, inline {})",
            store.id(thread),
            store.ctrl_id(thread),
            session.selected_unwind(),
            session.selected_inline_depth()
        );
    }
}

/// ユーザーが扱うエンティティを一覧表示する
fn print_entities(session: &Session<ChannelControl>) {
    let store = session.store();
    let kinds = [
        EntityKind::Target,
        EntityKind::Breakpoint,
        EntityKind::WatchPin,
        EntityKind::Process,
        EntityKind::Thread,
        EntityKind::Module,
        EntityKind::EndedProcess,
    ];
    for kind in kinds {
        let entities = store.entities_of_kind(kind);
        if entities.is_empty() {
            continue;
        }
        println!("{} ({}):", kind, entities.len());
        for e in entities {
            let mut line = format!("  [{}] {}", store.id(e), store.name(e));
            if let Some(vaddr) = store.vaddr(e) {
                line.push_str(&format!(" @ 0x{:x}", vaddr));
            }
            if let Some((l, c)) = store.text_point(e) {
                let file = store.ancestor_of_kind(e, EntityKind::File);
                line.push_str(&format!(" {}:{}:{}", store.name(file), l, c));
            }
            if kind == EntityKind::Breakpoint {
                line.push_str(&format!(" (hits: {})", store.value(e)));
            }
            if store.is_disabled(e) {
                line.push_str(" [disabled]");
            }
            if store.is_frozen(e) {
                line.push_str(" [frozen]");
            }
            println!("{}", line);
        }
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help (h)            - Show this help message");
    println!("  quit/exit/q         - Exit the shell");
    println!("  info (i)            - List targets, breakpoints, processes and threads");
    println!("  status              - Show run state and selection");
    println!();
    println!("Run control:");
    println!("  target <exe> [args] - Register an executable as a target");
    println!("  run (r)             - Launch targets or continue");
    println!("  start               - Launch and stop at the entry point");
    println!("  continue (c)        - Continue execution");
    println!("  restart             - Kill and relaunch");
    println!("  halt                - Stop a running target");
    println!("  kill (k) [id]       - Kill one or all processes");
    println!("  attach <pid>        - Attach to a process");
    println!("  detach <id>         - Detach from a process");
    println!("  retry <id>          - Relaunch an ended process");
    println!();
    println!("Stepping:");
    println!("  step (s) / next (n) - Step into / over");
    println!("  stepi (si) / nexti (ni) - Step by instruction");
    println!("  finish (f)          - Step out of the current function");
    println!("  until (u) <addr>    - Run to an address");
    println!("  jump <addr>         - Set the instruction pointer");
    println!();
    println!("Selection:");
    println!("  thread <id>         - Select a thread");
    println!("  frame <n> [inline]  - Select a call stack frame and inline depth");
    println!("  up / down           - Move the frame selection");
    println!("  freeze <id> / thaw <id> - Freeze or thaw a thread, process or machine");
    println!("  solo on|off         - Toggle solo stepping");
    println!();
    println!("Entities:");
    println!("  break (b) <loc>     - Toggle a breakpoint at file:line, address or symbol");
    println!("  watch (w) <expr>    - Toggle a watch pin");
    println!("  enable/disable <id> - Enable or disable an entity");
    println!("  delete (d) <id>     - Remove an entity");
    println!("  rename <id> <name>  - Rename an entity");
    println!("  dup <id>            - Duplicate an entity");
    println!("  edit <id> <loc>     - Move a breakpoint");
    println!("  undo / redo         - Undo or redo entity edits");
    println!();
    println!("Examples:");
    println!("  target ./app --verbose");
    println!("  break src/main.rs:42");
    println!("  break 0x401000");
    println!("  run");
}
