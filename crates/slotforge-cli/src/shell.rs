use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use slotforge_contracts::shell::{parse_intent, Intent, SHELL_HELP_COMMANDS};
use slotforge_engine::{
    Board, EngineError, GeminiExpander, JobOutcome, SectionController, SessionPhase,
    SlotforgeConfig,
};

use crate::{open_board, with_progress};

enum Flow {
    Continue,
    Quit,
}

struct ShellState {
    board: Board,
    config: SlotforgeConfig,
    out_dir: PathBuf,
}

pub(crate) async fn run_shell(
    config: &SlotforgeConfig,
    out: Option<PathBuf>,
    events: Option<PathBuf>,
) -> Result<()> {
    let out_dir = out.unwrap_or_else(|| config.out_dir.clone());
    let events_path = events.unwrap_or_else(|| out_dir.join("events.jsonl"));
    let mut state = ShellState {
        board: open_board(config, Some(events_path))?,
        config: config.clone(),
        out_dir,
    };
    if let Err(err) = state.board.refresh_loras().await {
        log::warn!("could not list LoRA adapters: {err}");
    }

    println!(
        "slotforge shell ({} backend, {} sections). Type /help for commands.",
        state.board.backend().name(),
        state.board.sections().len()
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        match handle_intent(&mut state, &intent).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }
    Ok(())
}

async fn handle_intent(state: &mut ShellState, intent: &Intent) -> Result<Flow> {
    let board = &state.board;
    match intent.action.as_str() {
        "help" => println!("Commands: {}", SHELL_HELP_COMMANDS.join(" ")),
        "quit" => return Ok(Flow::Quit),
        "set_global_prompt" => {
            let text = intent.arg_str("text").unwrap_or_default().to_string();
            board.set_global_prompt(&text);
            println!("Global prompt set to \"{text}\"");
        }
        "set_style" => {
            let text = intent.arg_str("text").unwrap_or_default().to_string();
            board.update_settings(|settings| settings.style = text.clone());
            println!("Style set to \"{text}\"");
        }
        "set_lora" => {
            let selection = board.select_lora(intent.arg_str("text"));
            if let Some(reason) = &selection.fallback_reason {
                println!("{reason}");
            }
            println!("LoRA set to {}", selection.selector_value());
        }
        "set_sampler" => {
            let Some(sampler) = intent.arg_str("text").map(str::to_string) else {
                println!("/sampler requires a name");
                return Ok(Flow::Continue);
            };
            board.update_settings(|settings| settings.sampler = sampler.clone());
            println!("Sampler set to {sampler}");
        }
        "set_negative_prompt" => {
            let text = intent.arg_str("text").unwrap_or_default().to_string();
            board.update_settings(|settings| settings.negative_prompt = text.clone());
            println!("Negative prompt set to \"{text}\"");
        }
        "set_variant_count" => {
            let Some(count) = intent.arg_u64("value") else {
                println!("/count requires a number from 1 to 10");
                return Ok(Flow::Continue);
            };
            board.update_settings(|settings| {
                settings.set_variant_count(u32::try_from(count).unwrap_or(u32::MAX))
            });
            println!("Variant count set to {}", board.settings().variant_count);
        }
        "set_cfg_scale" => {
            let Some(cfg) = intent.arg_f64("value").filter(|value| *value > 0.0) else {
                println!("/cfg requires a positive number");
                return Ok(Flow::Continue);
            };
            board.update_settings(|settings| settings.cfg_scale = cfg);
            println!("CFG scale set to {cfg}");
        }
        "set_steps" => {
            let Some(steps) = intent
                .arg_u64("value")
                .and_then(|value| u32::try_from(value).ok())
                .filter(|value| *value > 0)
            else {
                println!("/steps requires a positive whole number");
                return Ok(Flow::Continue);
            };
            board.update_settings(|settings| settings.steps = steps);
            println!("Steps set to {steps}");
        }
        "edit_prompt" => {
            let section = section_arg(board, intent)?;
            let prompt = intent.prompt.clone().unwrap_or_default();
            section.edit_prompt(&prompt);
            println!("{} prompt set to \"{prompt}\"", section.title());
        }
        "use_global_prompt" => {
            let section = section_arg(board, intent)?;
            section.use_global_prompt();
            println!("{} now follows the global prompt", section.title());
        }
        "set_size" => {
            let section = section_arg(board, intent)?;
            let (Some(width), Some(height)) = (intent.arg_u64("width"), intent.arg_u64("height"))
            else {
                println!("/size requires WIDTHxHEIGHT, e.g. 512x768");
                return Ok(Flow::Continue);
            };
            section.set_dimensions(
                u32::try_from(width).unwrap_or(u32::MAX),
                u32::try_from(height).unwrap_or(u32::MAX),
            );
            let view = section.view();
            println!("{} size set to {}x{}", section.title(), view.width, view.height);
        }
        "generate" => {
            let section = section_arg(board, intent)?;
            let count = with_progress(section, section.generate(None)).await?;
            println!("{}: {count} variant(s)", section.title());
        }
        "generate_all" => {
            let count = intent
                .arg_u64("value")
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(board.settings().variant_count)
                .clamp(1, 10);
            let results = board.generate_all(count).await?;
            let failed = results.iter().filter(|entry| entry.result.is_err()).count();
            for entry in results.iter().filter(|entry| entry.result.is_err()) {
                if let Err(err) = &entry.result {
                    println!("  {}: {err}", entry.title);
                }
            }
            println!(
                "Generated {count} variant(s) for {} of {} sections",
                results.len() - failed,
                results.len()
            );
        }
        "regenerate" => {
            let section = section_arg(board, intent)?;
            let index = index_arg(intent)?;
            with_progress(section, section.regenerate(index)).await?;
            println!("{}: variant {index} regenerated", section.title());
        }
        "discard" => {
            let section = section_arg(board, intent)?;
            let index = index_arg(intent)?;
            section.discard(index)?;
            println!(
                "{}: variant {index} discarded ({} left)",
                section.title(),
                section.view().gallery.len()
            );
        }
        "set_final" => {
            let section = section_arg(board, intent)?;
            let index = index_arg(intent)?;
            let entry = section.set_as_final(index)?;
            println!(
                "{}: variant {index} is final ({}x{})",
                section.title(),
                entry.width,
                entry.height
            );
        }
        "download" => {
            let section = section_arg(board, intent)?;
            let index = index_arg(intent)?;
            let path = section.download(index, &state.out_dir.join("downloads"))?;
            println!("Saved {}", path.display());
        }
        "status" => {
            let section = section_arg(board, intent)?;
            print_status(section);
        }
        "sections" => {
            for section in board.sections() {
                let view = section.view();
                let marker = if view.prompt.is_overridden() { "*" } else { " " };
                println!(
                    "{marker} {:<16} {:<14} {}x{}  {} variant(s)",
                    section.key(),
                    section.title(),
                    view.width,
                    view.height,
                    view.gallery.len()
                );
            }
        }
        "finals" => {
            let finals = board.finals().snapshot();
            if finals.is_empty() {
                println!("No finals selected.");
            }
            for (title, entry) in finals {
                println!("{title}: {}x{} {}", entry.width, entry.height, entry.artifact.mime_type());
            }
        }
        "export" => {
            let dir = intent
                .arg_str("path")
                .map(PathBuf::from)
                .unwrap_or_else(|| state.out_dir.join("final"));
            let manifest = board.export_finals(&dir)?;
            println!("Final canvas written to {}", manifest.display());
        }
        "expand" => {
            let expander = GeminiExpander::new(&state.config.gemini)?;
            let bundle = board.expand_and_apply(&expander, intent.arg_str("text")).await?;
            println!(
                "Expanded into {} symbol and {} wild prompts",
                bundle.symbol_icons.len(),
                bundle.wild_icons.len()
            );
        }
        "loras" => {
            let loras = state.board.refresh_loras().await?;
            if loras.is_empty() {
                println!("No LoRA adapters installed.");
            }
            for lora in loras {
                match lora.alias {
                    Some(alias) => println!("{} (alias: {alias})", lora.name),
                    None => println!("{}", lora.name),
                }
            }
        }
        "health" => {
            let report = board.backend().health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or("unknown");
            println!("Unknown command: /{command}");
        }
        other => println!("Unhandled action: {other}"),
    }
    Ok(Flow::Continue)
}

fn section_arg<'a>(board: &'a Board, intent: &Intent) -> Result<&'a SectionController> {
    let key = intent
        .arg_str("section")
        .ok_or_else(|| anyhow!("this command needs a section, see /sections"))?;
    Ok(board.section(key)?)
}

fn index_arg(intent: &Intent) -> Result<usize> {
    intent
        .arg_u64("index")
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| anyhow!("this command needs a variant index (0-based)"))
}

fn print_status(section: &SectionController) {
    let view = section.view();
    let phase = match view.phase {
        SessionPhase::Idle => "idle",
        SessionPhase::Submitting => "submitting",
        SessionPhase::Polling => "polling",
    };
    println!("{} [{}] {}x{}", section.title(), phase, view.width, view.height);
    let source = if view.prompt.is_overridden() { "override" } else { "global" };
    println!("  prompt ({source}): {}", section.effective_prompt());
    match section.composed_prompt() {
        Ok(prompt) => println!("  sends: {prompt}"),
        Err(EngineError::Validation(err)) => println!("  sends: nothing yet ({err})"),
        Err(err) => println!("  sends: {err}"),
    }
    println!("  variants: {}", view.gallery.len());
    if let Some(progress) = view.progress {
        println!("  progress: {progress}");
    }
    match view.last_outcome {
        Some(JobOutcome::Succeeded { variants }) => println!("  last job: {variants} variant(s)"),
        Some(JobOutcome::Failed { message }) => println!("  last job failed: {message}"),
        None => {}
    }
}
