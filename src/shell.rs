//! # Operator Command Shell
//!
//! A `rustyline`-driven REPL mirroring `original_source/trunk/src/main.c`'s
//! `CommandLoop`/`GetCommand`/`ProcessFile` trio: read a line, split it into
//! a command word and the rest of the line as its argument, look the word up
//! in a dispatch table, and run the match. A startup script (`--script
//! PATH`) replays the same table line-by-line before the interactive prompt
//! starts, printing `"<file>(<lineno>): Unknown command \"<name>\""` and
//! continuing past it, exactly as `ProcessFile` does (SPEC_FULL.md §6).

use crate::engine::Engine;
use crate::error::{CommandError, CommandErrorKind, EngineError, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;

const PROMPT: &str = "DVBStream> ";

type CommandResult = std::result::Result<String, CommandError>;
type CommandFuture<'a> = Pin<Box<dyn Future<Output = CommandResult> + Send + 'a>>;
/// One entry of the command table: `original_source`'s `Command_t` reduced
/// to what a safe-Rust dispatch table needs — the handler itself, since
/// help text lives alongside it in [`COMMANDS`] rather than in the function
/// pointer's signature.
type CommandHandler = for<'a> fn(&'a Shell, &'a str) -> CommandFuture<'a>;

struct CommandEntry {
    name: &'static str,
    short_help: &'static str,
    long_help: &'static str,
    handler: CommandHandler,
}

const COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        name: "quit",
        short_help: "Exit the program",
        long_help: "Exit the program; can also be used in a startup script to stop further processing.",
        handler: cmd_quit,
    },
    CommandEntry {
        name: "services",
        short_help: "List all cached services",
        long_help: "Lists every service currently in the cache. This list is updated as new PAT/SDT sections arrive.",
        handler: cmd_services,
    },
    CommandEntry {
        name: "multiplex",
        short_help: "List the services on the current multiplex",
        long_help: "Lists only the services on the currently tuned multiplex.",
        handler: cmd_multiplex,
    },
    CommandEntry {
        name: "select",
        short_help: "Select the current service",
        long_help: "select <service name>\nSets <service name> as the current service for later commands.",
        handler: cmd_select,
    },
    CommandEntry {
        name: "pids",
        short_help: "List the PIDs for a service",
        long_help: "pids [service name]\nLists the PIDs for <service name>, or the currently selected service.",
        handler: cmd_pids,
    },
    CommandEntry {
        name: "stats",
        short_help: "Display reader and output packet statistics",
        long_help: "Displays the TS reader's packet/bitrate/continuity-error counters and the current output list.",
        handler: cmd_stats,
    },
    CommandEntry {
        name: "addoutput",
        short_help: "Add a manually filtered output",
        long_help: "addoutput <name> <mrl>\nAdds a new manual output with no PIDs filtered yet; use addpid to add some.",
        handler: cmd_addoutput,
    },
    CommandEntry {
        name: "addserviceoutput",
        short_help: "Add an output that streams a whole service",
        long_help: "addserviceoutput <name> <mrl> <service name> [avs]\nStreams <service name>'s current PIDs with a synthesised PAT/PMT. Pass \"avs\" to restrict to one video/audio/subtitle stream.",
        handler: cmd_addserviceoutput,
    },
    CommandEntry {
        name: "rmoutput",
        short_help: "Remove an output",
        long_help: "rmoutput <name>\nRemoves the output and stops all filtering associated with it.",
        handler: cmd_rmoutput,
    },
    CommandEntry {
        name: "outputs",
        short_help: "List current outputs",
        long_help: "Lists every active output's name and destination MRL.",
        handler: cmd_outputs,
    },
    CommandEntry {
        name: "addpid",
        short_help: "Add a PID to a manual output",
        long_help: "addpid <output name> <pid>\nAdds a PID to filter to the specified manual output.",
        handler: cmd_addpid,
    },
    CommandEntry {
        name: "rmpid",
        short_help: "Remove a PID from a manual output",
        long_help: "rmpid <output name> <pid>\nRemoves a PID from the specified manual output's filter.",
        handler: cmd_rmpid,
    },
    CommandEntry {
        name: "outputpids",
        short_help: "List the PIDs an output forwards",
        long_help: "outputpids <output name>\nLists the PIDs currently being forwarded to the specified output.",
        handler: cmd_outputpids,
    },
    CommandEntry {
        name: "help",
        short_help: "Display the command list, or help on one command",
        long_help: "help [command]\nDisplays help for the specified command, or lists every command.",
        handler: cmd_help,
    },
];

/// Operator-facing REPL wrapping one [`Engine`].
pub struct Shell {
    engine: std::sync::Arc<Engine>,
    current_service: Mutex<Option<String>>,
    quit: std::sync::atomic::AtomicBool,
}

impl Shell {
    pub fn new(engine: std::sync::Arc<Engine>) -> Self {
        Self {
            engine,
            current_service: Mutex::new(None),
            quit: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn find(name: &str) -> Option<&'static CommandEntry> {
        COMMANDS.iter().find(|c| c.name == name)
    }

    /// Splits `line` into a command word and the remaining argument text, as
    /// `ParseLine` does (first run of whitespace is the separator; leading
    /// and trailing whitespace on the argument is trimmed).
    fn parse_line(line: &str) -> Option<(&str, &str)> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.split_once(char::is_whitespace) {
            Some((command, rest)) => Some((command, rest.trim())),
            None => Some((line, "")),
        }
    }

    /// Looks the command up and runs it, returning `None` only when the
    /// command word isn't recognised (`ProcessCommand`'s `false` return).
    async fn process(&self, command: &str, argument: &str) -> Option<CommandResult> {
        let entry = Self::find(command)?;
        Some((entry.handler)(self, argument).await)
    }

    /// Replays `path` line by line, matching `ProcessFile`: unknown commands
    /// and command errors are reported but do not stop the replay, except
    /// for `quit` itself.
    pub async fn run_script(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let display = path.display().to_string();

        for (lineno, raw_line) in content.lines().enumerate() {
            if self.quit.load(std::sync::atomic::Ordering::Acquire) {
                break;
            }
            let Some((command, argument)) = Self::parse_line(raw_line) else {
                continue;
            };
            match self.process(command, argument).await {
                Some(Ok(message)) => {
                    if !message.is_empty() {
                        println!("{message}");
                    }
                }
                Some(Err(err)) => println!("{display}({lineno}): {err}"),
                None => println!("{display}({lineno}): Unknown command \"{command}\""),
            }
        }
        Ok(())
    }

    /// Runs the interactive prompt loop until `quit` is entered or the
    /// input stream closes, persisting history to `history_path` across
    /// runs. `readline` blocks a worker thread (via `spawn_blocking`) rather
    /// than the async task running this loop, so `sqlx`/store work from
    /// other tasks keeps making progress while the operator is mid-line.
    pub async fn run(&self, history_path: &Path) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(|e| EngineError::Config(e.to_string()))?;
        let _ = editor.load_history(history_path);

        while !self.quit.load(std::sync::atomic::Ordering::Acquire) {
            let (returned_editor, readline_result) = tokio::task::spawn_blocking(move || {
                let result = editor.readline(PROMPT);
                (editor, result)
            })
            .await
            .map_err(|e| EngineError::Config(e.to_string()))?;
            editor = returned_editor;

            match readline_result {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(line.as_str());
                    let Some((command, argument)) = Self::parse_line(&line) else {
                        continue;
                    };
                    match self.process(command, argument).await {
                        Some(Ok(message)) => {
                            if !message.is_empty() {
                                println!("{message}");
                            }
                        }
                        Some(Err(err)) => println!("{err}"),
                        None => println!("Unknown command \"{command}\""),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(EngineError::Config(err.to_string())),
            }
        }

        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.save_history(history_path);
        Ok(())
    }
}

fn not_found(message: impl Into<String>) -> CommandError {
    CommandError::new(CommandErrorKind::NotFound, message)
}

fn bad_syntax(message: impl Into<String>) -> CommandError {
    CommandError::new(CommandErrorKind::BadSyntax, message)
}

fn cmd_quit(shell: &Shell, _argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        shell.quit.store(true, std::sync::atomic::Ordering::Release);
        Ok(String::new())
    })
}

fn cmd_services(shell: &Shell, _argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let mut out = String::new();
        for service in shell.engine.cache().services() {
            out.push_str(&format!("{:4x}: {}\n", service.service_id, service.name()));
        }
        Ok(out)
    })
}

fn cmd_multiplex(shell: &Shell, _argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        match shell.engine.cache().current_multiplex() {
            None => Ok("No multiplex currently selected!\n".to_string()),
            Some(_) => {
                let mut out = String::new();
                for service in shell.engine.cache().services() {
                    out.push_str(&format!("{:4x}: {}\n", service.service_id, service.name()));
                }
                Ok(out)
            }
        }
    })
}

fn cmd_select(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        if argument.is_empty() {
            return Err(bad_syntax("No service specified!"));
        }
        let service = shell
            .engine
            .cache()
            .find_by_name(argument)
            .await
            .map_err(CommandError::from)?
            .ok_or_else(|| not_found(format!("Could not find \"{argument}\"")))?;
        *shell.current_service.lock().unwrap() = Some(argument.to_string());
        Ok(format!("Name      = {}\nID        = {:04x}", service.name(), service.service_id))
    })
}

fn cmd_pids(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let name = if argument.is_empty() {
            shell
                .current_service
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| bad_syntax("No service specified!"))?
        } else {
            argument.to_string()
        };
        let service = shell
            .engine
            .cache()
            .find_by_name(&name)
            .await
            .map_err(CommandError::from)?
            .ok_or_else(|| not_found(format!("Could not find \"{name}\"")))?;
        let Some(info) = service.program_info() else {
            return Ok("No PIDs known yet for this service.".to_string());
        };
        let mut out = String::new();
        for stream in &info.streams {
            out.push_str(&format!("{:04x}: type {:#04x}\n", stream.pid, stream.stream_type));
        }
        out.push_str(&format!("PCR PID   = {:04x}\n", info.pcr_pid));
        Ok(out)
    })
}

fn cmd_stats(shell: &Shell, _argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let stats = shell.engine.reader_stats();
        let mut out = format!(
            "Packet Statistics\n-----------------\nTotal     : {}\nBitrate   : {} bps\nCC errors : {}\n\nOutputs\n-------\n",
            stats.total_packets, stats.bitrate_bps, stats.continuity_errors
        );
        for name in shell.engine.output_names() {
            out.push_str(&format!("{name}\n"));
        }
        Ok(out)
    })
}

fn cmd_addoutput(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let mut parts = argument.splitn(2, char::is_whitespace);
        let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| bad_syntax("addoutput <name> <mrl>"))?;
        let mrl = parts.next().map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| bad_syntax("addoutput <name> <mrl>"))?;
        shell.engine.add_manual_output(name, mrl, Vec::new()).map_err(CommandError::from)?;
        Ok(String::new())
    })
}

fn cmd_addserviceoutput(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let mut words = argument.split_whitespace();
        let name = words.next().ok_or_else(|| bad_syntax("addserviceoutput <name> <mrl> <service name> [avs]"))?;
        let mrl = words.next().ok_or_else(|| bad_syntax("addserviceoutput <name> <mrl> <service name> [avs]"))?;
        let remainder: Vec<&str> = words.collect();
        let avs_only = remainder.last().is_some_and(|w| w.eq_ignore_ascii_case("avs"));
        let service_name = if avs_only { &remainder[..remainder.len() - 1] } else { &remainder[..] };
        if service_name.is_empty() {
            return Err(bad_syntax("addserviceoutput <name> <mrl> <service name> [avs]"));
        }
        shell
            .engine
            .add_service_output(name, mrl, &service_name.join(" "), avs_only)
            .await
            .map_err(CommandError::from)?;
        Ok(String::new())
    })
}

fn cmd_rmoutput(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        if argument.is_empty() {
            return Err(bad_syntax("rmoutput <output name>"));
        }
        shell.engine.remove_output(argument).map_err(CommandError::from)?;
        Ok(String::new())
    })
}

fn cmd_outputs(shell: &Shell, _argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let mut out = String::new();
        for name in shell.engine.output_names() {
            let mrl = shell.engine.with_output(&name, |o| o.mrl().to_string()).unwrap_or_default();
            out.push_str(&format!("{name:>10} : {mrl}\n"));
        }
        Ok(out)
    })
}

/// Splits `<output name> <pid>` the way `ParseOutputPID` does, accepting a
/// decimal or `0x`-prefixed hex PID.
fn parse_output_pid(argument: &str) -> std::result::Result<(&str, u16), CommandError> {
    let mut parts = argument.split_whitespace();
    let name = parts.next().ok_or_else(|| bad_syntax("expected <output name> <pid>"))?;
    let pid_text = parts.next().ok_or_else(|| bad_syntax("expected <output name> <pid>"))?;
    let pid = if let Some(hex) = pid_text.strip_prefix("0x") {
        u16::from_str_radix(hex, 16)
    } else {
        pid_text.parse()
    }
    .map_err(|_| bad_syntax(format!("invalid PID \"{pid_text}\"")))?;
    Ok((name, pid))
}

fn cmd_addpid(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let (name, pid) = parse_output_pid(argument)?;
        shell.engine.add_pid(name, pid).map_err(CommandError::from)?;
        Ok(String::new())
    })
}

fn cmd_rmpid(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        let (name, pid) = parse_output_pid(argument)?;
        shell.engine.remove_pid(name, pid).map_err(CommandError::from)?;
        Ok(String::new())
    })
}

fn cmd_outputpids(shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        if argument.is_empty() {
            return Err(bad_syntax("outputpids <output name>"));
        }
        let pids = shell
            .engine
            .with_output(argument, |o| o.pids())
            .ok_or_else(|| not_found(format!("no such output: {argument}")))?;
        Ok(pids.iter().map(|p| format!("{p:04x}")).collect::<Vec<_>>().join("\n"))
    })
}

fn cmd_help(_shell: &Shell, argument: &str) -> CommandFuture<'_> {
    Box::pin(async move {
        if argument.is_empty() {
            let mut out = String::new();
            for entry in COMMANDS {
                out.push_str(&format!("{:14} {}\n", entry.name, entry.short_help));
            }
            return Ok(out);
        }
        match Shell::find(argument) {
            Some(entry) => Ok(entry.long_help.to_string()),
            None => Err(not_found(format!("Unknown command \"{argument}\""))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_splits_command_and_argument() {
        assert_eq!(Shell::parse_line("select BBC ONE"), Some(("select", "BBC ONE")));
        assert_eq!(Shell::parse_line("quit"), Some(("quit", "")));
        assert_eq!(Shell::parse_line("   "), None);
    }

    #[test]
    fn parse_output_pid_accepts_decimal_and_hex() {
        assert_eq!(parse_output_pid("out1 256").unwrap(), ("out1", 256));
        assert_eq!(parse_output_pid("out1 0x100").unwrap(), ("out1", 0x100));
        assert!(parse_output_pid("out1").is_err());
    }

    #[tokio::test]
    async fn unknown_command_is_reported_as_none() {
        let store = std::sync::Arc::new(crate::store::Store::connect_in_memory().await.unwrap());
        let engine = std::sync::Arc::new(
            Engine::new(Box::new(crate::tuner::NullTuner::default()), store, 1, 50)
                .await
                .unwrap(),
        );
        let shell = Shell::new(engine);
        assert!(shell.process("frobnicate", "").await.is_none());
    }

    #[tokio::test]
    async fn help_with_no_argument_lists_every_command() {
        let store = std::sync::Arc::new(crate::store::Store::connect_in_memory().await.unwrap());
        let engine = std::sync::Arc::new(
            Engine::new(Box::new(crate::tuner::NullTuner::default()), store, 1, 50)
                .await
                .unwrap(),
        );
        let shell = Shell::new(engine);
        let output = shell.process("help", "").await.unwrap().unwrap();
        assert!(output.contains("quit"));
        assert!(output.contains("addserviceoutput"));
    }
}
