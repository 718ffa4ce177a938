mod shell;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use slotforge_contracts::prompt::{compose, PromptContext};
use slotforge_contracts::sections::{reference_layout, slugify};
use slotforge_engine::{
    backend_from_config, Board, BoardOptions, GeminiExpander, ImageBackend, PromptExpander,
    SectionController, SlotforgeConfig,
};

#[derive(Debug, Parser)]
#[command(name = "slotforge", version, about = "Slot-game art pack generator")]
struct Cli {
    /// JSON settings file; missing means defaults.
    #[arg(long, global = true, default_value = "slotforge.json")]
    config: PathBuf,
    /// `a1111` or `dryrun`.
    #[arg(long, global = true)]
    backend: Option<String>,
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe the image backend.
    Health,
    /// List LoRA adapters installed on the backend.
    Loras,
    /// Print the prompt a section would send, without generating.
    Compose(ComposeArgs),
    /// Expand a theme into per-section prompts with the text model.
    Expand(ExpandArgs),
    /// Generate variants for one section.
    Generate(GenerateArgs),
    /// Generate variants for every section of the reference layout.
    GenerateAll(GenerateAllArgs),
    /// Interactive slash-command shell.
    Shell(ShellArgs),
}

#[derive(Debug, Clone, Default, Args)]
struct SettingsArgs {
    /// Global prompt shared by every section that has no override.
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    style: Option<String>,
    /// Adapter name or alias; `none` disables it.
    #[arg(long)]
    lora: Option<String>,
    #[arg(long)]
    negative: Option<String>,
    #[arg(long)]
    cfg: Option<f64>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    sampler: Option<String>,
    /// Variants per section (1-10).
    #[arg(long)]
    count: Option<u32>,
}

#[derive(Debug, Args)]
struct ComposeArgs {
    #[arg(long, default_value = "background")]
    section: String,
    /// Section override; the global prompt is used when absent.
    #[arg(long)]
    section_prompt: Option<String>,
    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Debug, Args)]
struct ExpandArgs {
    theme: String,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    section: String,
    #[arg(long)]
    section_prompt: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Debug, Args)]
struct GenerateAllArgs {
    #[arg(long)]
    out: Option<PathBuf>,
    /// Expand the global prompt with the text model first.
    #[arg(long)]
    expand: bool,
    /// Promote each section's first variant and export the final canvas.
    #[arg(long)]
    finals: bool,
    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Debug, Args)]
struct ShellArgs {
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("slotforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli.command, config))
}

async fn dispatch(command: Command, config: SlotforgeConfig) -> Result<i32> {
    match command {
        Command::Health => run_health(&config).await,
        Command::Loras => run_loras(&config).await,
        Command::Compose(args) => run_compose(args),
        Command::Expand(args) => run_expand(&config, args).await,
        Command::Generate(args) => run_generate(&config, args).await,
        Command::GenerateAll(args) => run_generate_all(&config, args).await,
        Command::Shell(args) => {
            shell::run_shell(&config, args.out, args.events).await?;
            Ok(0)
        }
    }
}

fn load_config(cli: &Cli) -> Result<SlotforgeConfig> {
    let mut config = SlotforgeConfig::load_or_default(&cli.config)?;
    apply_overrides(&mut config, cli.backend.as_deref(), cli.base_url.as_deref());
    Ok(config)
}

fn apply_overrides(config: &mut SlotforgeConfig, backend: Option<&str>, base_url: Option<&str>) {
    if let Some(backend) = backend.map(str::trim).filter(|value| !value.is_empty()) {
        config.backend = backend.to_ascii_lowercase();
    }
    if let Some(base_url) = base_url.map(str::trim).filter(|value| !value.is_empty()) {
        config.a1111.base_url = base_url.to_string();
    }
}

async fn run_health(config: &SlotforgeConfig) -> Result<i32> {
    let backend = backend_from_config(config)?;
    let report = backend.health().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.ok { 0 } else { 1 })
}

async fn run_loras(config: &SlotforgeConfig) -> Result<i32> {
    let backend = backend_from_config(config)?;
    let loras = backend.loras().await?;
    if loras.is_empty() {
        println!("No LoRA adapters installed.");
    }
    for lora in loras {
        match lora.alias {
            Some(alias) => println!("{} (alias: {alias})", lora.name),
            None => println!("{}", lora.name),
        }
    }
    Ok(0)
}

fn run_compose(args: ComposeArgs) -> Result<i32> {
    let slug = slugify(&args.section);
    let Some(spec) = reference_layout()
        .into_iter()
        .find(|spec| spec.key() == slug)
    else {
        bail!("unknown section '{}'", args.section);
    };
    let context = PromptContext {
        global_prompt: args.settings.prompt.unwrap_or_default(),
        section_prompt: args.section_prompt,
        global_style: args.settings.style.unwrap_or_default(),
        lora: args.settings.lora,
        cohesion_hint: spec.cohesion_hint,
        min_words: spec.min_words,
    };
    println!("{}", compose(&context)?);
    Ok(0)
}

async fn run_expand(config: &SlotforgeConfig, args: ExpandArgs) -> Result<i32> {
    let expander = GeminiExpander::new(&config.gemini)?;
    let bundle = expander.expand(&args.theme).await?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(0)
}

async fn run_generate(config: &SlotforgeConfig, args: GenerateArgs) -> Result<i32> {
    let mut board = open_board(config, None)?;
    apply_settings(&mut board, &args.settings).await?;
    let section = board.section(&args.section)?.clone();
    if let Some(prompt) = &args.section_prompt {
        section.edit_prompt(prompt);
    }
    if args.width.is_some() || args.height.is_some() {
        let view = section.view();
        section.set_dimensions(
            args.width.unwrap_or(view.width),
            args.height.unwrap_or(view.height),
        );
    }

    let count = with_progress(&section, section.generate(None)).await?;
    let out = args.out.unwrap_or_else(|| config.out_dir.clone());
    let written = write_gallery(&section, &out)?;
    println!("{}: {count} variant(s)", section.title());
    for path in written {
        println!("  {}", path.display());
    }
    Ok(0)
}

async fn run_generate_all(config: &SlotforgeConfig, args: GenerateAllArgs) -> Result<i32> {
    let out = args.out.unwrap_or_else(|| config.out_dir.clone());
    let mut board = open_board(config, Some(out.join("events.jsonl")))?;
    apply_settings(&mut board, &args.settings).await?;

    if args.expand {
        let expander = GeminiExpander::new(&config.gemini)?;
        board.expand_and_apply(&expander, None).await?;
    }

    let count = board.settings().variant_count;
    let results = board.generate_all(count).await?;
    let mut failures = 0;
    for entry in &results {
        let section = board.section(&entry.title)?;
        match &entry.result {
            Ok(variants) => {
                let written = write_gallery(section, &out.join(section.key()))?;
                println!("{}: {variants} variant(s), {} file(s)", entry.title, written.len());
                if args.finals && *variants > 0 {
                    section.set_as_final(0)?;
                }
            }
            Err(err) => {
                failures += 1;
                println!("{}: failed: {err}", entry.title);
            }
        }
    }

    if args.finals && !board.finals().is_empty() {
        let manifest = board.export_finals(&out.join("final"))?;
        println!("Final canvas written to {}", manifest.display());
    }
    println!(
        "{} of {} sections succeeded",
        results.len() - failures,
        results.len()
    );
    Ok(if failures == 0 { 0 } else { 2 })
}

fn open_board(config: &SlotforgeConfig, journal_path: Option<PathBuf>) -> Result<Board> {
    let backend: Arc<dyn ImageBackend> = backend_from_config(config)?;
    Ok(Board::with_reference_layout(
        backend,
        BoardOptions {
            poll_interval: config.poll_interval(),
            journal_path,
        },
    ))
}

async fn apply_settings(board: &mut Board, args: &SettingsArgs) -> Result<()> {
    if let Some(lora) = &args.lora {
        if !lora.trim().eq_ignore_ascii_case("none") {
            board
                .refresh_loras()
                .await
                .context("failed to list LoRA adapters")?;
        }
        let selection = board.select_lora(Some(lora));
        if let Some(reason) = selection.fallback_reason {
            eprintln!("{reason}");
        }
    }
    board.update_settings(|settings| {
        if let Some(prompt) = &args.prompt {
            settings.global_prompt = prompt.clone();
        }
        if let Some(style) = &args.style {
            settings.style = style.clone();
        }
        if let Some(negative) = &args.negative {
            settings.negative_prompt = negative.clone();
        }
        if let Some(cfg) = args.cfg {
            settings.cfg_scale = cfg;
        }
        if let Some(steps) = args.steps {
            settings.steps = steps;
        }
        if let Some(sampler) = &args.sampler {
            settings.sampler = sampler.clone();
        }
        if let Some(count) = args.count {
            settings.set_variant_count(count);
        }
    });
    Ok(())
}

/// Prints progress lines for `section` while `job` runs.
async fn with_progress<F: std::future::Future>(section: &SectionController, job: F) -> F::Output {
    let mut rx = section.subscribe();
    let title = section.title().to_string();
    let printer = tokio::spawn(async move {
        let mut last = None;
        while rx.changed().await.is_ok() {
            let progress = rx.borrow_and_update().progress;
            if progress.is_some() && progress != last {
                if let Some(snapshot) = progress {
                    eprintln!("  {title}: {snapshot}");
                }
                last = progress;
            }
        }
    });
    let output = job.await;
    printer.abort();
    output
}

/// Writes the whole gallery as `<slug>-v<N>.<ext>`.
fn write_gallery(section: &SectionController, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    section
        .view()
        .gallery
        .iter()
        .enumerate()
        .map(|(idx, artifact)| {
            let path = dir.join(format!("{}-v{}.{}", section.key(), idx + 1, artifact.extension()));
            std::fs::write(&path, artifact.bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use slotforge_engine::{Board, BoardOptions, DryrunBackend};

    use super::{apply_overrides, apply_settings, write_gallery, Cli, Command, SettingsArgs};
    use slotforge_engine::SlotforgeConfig;

    #[test]
    fn global_flags_parse_after_subcommand() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "slotforge",
            "generate-all",
            "--prompt",
            "candy kingdom",
            "--count",
            "3",
            "--backend",
            "dryrun",
        ])?;
        assert_eq!(cli.backend.as_deref(), Some("dryrun"));
        let Command::GenerateAll(args) = cli.command else {
            anyhow::bail!("expected generate-all");
        };
        assert_eq!(args.settings.prompt.as_deref(), Some("candy kingdom"));
        assert_eq!(args.settings.count, Some(3));
        assert!(!args.expand);
        Ok(())
    }

    #[test]
    fn flags_override_config_values() {
        let mut config = SlotforgeConfig::default();
        apply_overrides(&mut config, Some(" DryRun "), Some("http://gpu:7860/sdapi/v1"));
        assert_eq!(config.backend, "dryrun");
        assert_eq!(config.a1111.base_url, "http://gpu:7860/sdapi/v1");

        apply_overrides(&mut config, Some(""), None);
        assert_eq!(config.backend, "dryrun");
    }

    #[tokio::test]
    async fn generate_writes_numbered_gallery() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut board = Board::with_reference_layout(Arc::new(DryrunBackend::new()), BoardOptions::default());
        apply_settings(
            &mut board,
            &SettingsArgs {
                prompt: Some("candy kingdom".to_string()),
                count: Some(2),
                ..SettingsArgs::default()
            },
        )
        .await?;

        let section = board.section("wild-icon-1")?.clone();
        section.set_dimensions(32, 32);
        assert_eq!(section.generate(None).await?, 2);

        let written = write_gallery(&section, temp.path())?;
        let names: Vec<String> = written
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()).map(str::to_string))
            .collect();
        assert_eq!(names, vec!["wild-icon-1-v1.png", "wild-icon-1-v2.png"]);
        Ok(())
    }
}
