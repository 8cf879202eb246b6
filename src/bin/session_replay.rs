//! Session replay tool
//!
//! Replays a JSON command script against a generated in-memory scene and prints
//! each command outcome. Useful for reproducing failure-policy behaviour without
//! a host application.
//!
//! ```json
//! {
//!   "scene": { "drops": 3, "instances": 1, "ground": true },
//!   "settings": { "optimization": { "enabled": true } },
//!   "commands": [
//!     { "command": "start", "mode": "rigid" },
//!     { "command": "advance", "frames": 24 },
//!     { "command": "toggle_playback" },
//!     { "command": "bake_to_cache" },
//!     { "command": "apply" }
//!   ]
//! }
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dropsim::{
    CommandOutcome, DropError, DropResult, ForceFieldSettings, Handle, InMemoryScene, Mode, SessionContext,
    SessionOrchestrator, SessionSettings,
};

/// Replay configuration
struct Config {
    /// Script to replay
    script: PathBuf,
    /// Optional settings file, overriding the script's settings
    settings: Option<PathBuf>,
    /// Emit outcomes as JSON lines
    json: bool,
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut script = None;
    let mut settings = None;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--settings" | "-s" => {
                if i + 1 < args.len() {
                    settings = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --settings requires a value");
                    std::process::exit(1);
                }
            }
            "--json" => {
                json = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("session-replay - replay dropsim commands against an in-memory scene");
                println!();
                println!("USAGE:");
                println!("    session_replay [OPTIONS] <SCRIPT>");
                println!();
                println!("OPTIONS:");
                println!("    -s, --settings <FILE>     Settings JSON overriding the script");
                println!("        --json                Print outcomes as JSON lines");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
            arg => {
                script = Some(PathBuf::from(arg));
                i += 1;
            }
        }
    }

    let Some(script) = script else {
        eprintln!("error: missing <SCRIPT>");
        std::process::exit(1);
    };
    Config { script, settings, json }
}

/// Generated scene layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SceneLayout {
    drops: u32,
    instances: u32,
    instance_members: u32,
    ground: bool,
}

impl Default for SceneLayout {
    fn default() -> Self {
        Self {
            drops: 3,
            instances: 0,
            instance_members: 4,
            ground: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum Step {
    Start { mode: Mode },
    Apply,
    Reset,
    BakeToCache,
    BakeToKeyframes,
    ToggleMode,
    SetMode { mode: Mode },
    AddForce,
    RemoveForce,
    UpdateForce { strength: f32, distance: f32, flow: f32 },
    UpdateSecondaryEffect { strength: f32, axes: [bool; 3] },
    TogglePlayback,
    ApplyClothPreset { name: String },
    Shutdown,
    /// Moves the timeline forward.
    Advance { frames: i32 },
    /// Undoes the creation of the named objects behind the session's back.
    Undo { names: Vec<String> },
    /// Reselects the original drop objects.
    Reselect,
}

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    scene: SceneLayout,
    #[serde(default)]
    settings: SessionSettings,
    commands: Vec<Step>,
}

#[derive(Serialize)]
struct Line<'a> {
    step: usize,
    command: String,
    outcome: &'a CommandOutcome,
}

fn load(config: &Config) -> DropResult<Script> {
    let text = std::fs::read_to_string(&config.script).map_err(|e| {
        DropError::context(format!("cannot read {}: {e}", config.script.display()))
    })?;
    let mut script: Script = serde_json::from_str(&text)
        .map_err(|e| DropError::context(format!("invalid script {}: {e}", config.script.display())))?;
    if let Some(path) = &config.settings {
        script.settings = SessionSettings::from_path(path)?;
    }
    script.settings.validate()?;
    Ok(script)
}

fn build_scene(layout: &SceneLayout) -> DropResult<(InMemoryScene, Vec<Handle>)> {
    let scene = InMemoryScene::new();
    let host = |e| DropError::host("build_scene", e);
    if layout.ground {
        scene.add_mesh("Ground", [0.0; 3]).map_err(host)?;
    }
    let mut drops = Vec::new();
    for i in 0..layout.drops {
        #[allow(clippy::cast_precision_loss)]
        let x = i as f32 * 1.5;
        drops.push(scene.add_mesh(&format!("Drop.{i:03}"), [x, 0.0, 4.0]).map_err(host)?);
    }
    for i in 0..layout.instances {
        drops.push(
            scene
                .add_instance(&format!("Group.{i:03}"), layout.instance_members)
                .map_err(host)?,
        );
    }
    reselect(&scene, &drops)?;
    Ok((scene, drops))
}

fn reselect(scene: &InMemoryScene, drops: &[Handle]) -> DropResult<()> {
    use dropsim::host::SceneOps;
    scene.deselect_all().map_err(|e| DropError::host("deselect_all", e))?;
    for &drop in drops {
        if scene.exists(drop).unwrap_or(false) {
            scene.select(drop, true).map_err(|e| DropError::host("select", e))?;
        }
    }
    if let Some(&first) = drops.first() {
        let _ = scene.set_active(first);
    }
    Ok(())
}

fn replay(config: &Config) -> DropResult<usize> {
    let script = load(config)?;
    let (scene, drops) = build_scene(&script.scene)?;
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = SessionContext::new(script.settings);
    orchestrator.connect(&ctx)?;

    let mut cancelled = 0;
    for (step, command) in script.commands.into_iter().enumerate() {
        let label = format!("{command:?}");
        let outcome = match command {
            Step::Start { mode } => orchestrator.start(&mut ctx, mode),
            Step::Apply => orchestrator.apply(&mut ctx),
            Step::Reset => orchestrator.reset(&mut ctx),
            Step::BakeToCache => orchestrator.bake_to_cache(&mut ctx),
            Step::BakeToKeyframes => orchestrator.bake_to_keyframes(&mut ctx),
            Step::ToggleMode => orchestrator.toggle_mode(&mut ctx),
            Step::SetMode { mode } => orchestrator.set_mode(&mut ctx, mode),
            Step::AddForce => orchestrator.add_force(&mut ctx),
            Step::RemoveForce => orchestrator.remove_force(&mut ctx),
            Step::UpdateForce { strength, distance, flow } => {
                orchestrator.update_force(&mut ctx, ForceFieldSettings { strength, distance, flow })
            }
            Step::UpdateSecondaryEffect { strength, axes } => {
                orchestrator.update_secondary_effect(&mut ctx, strength, axes)
            }
            Step::TogglePlayback => orchestrator.toggle_playback(&mut ctx),
            Step::ApplyClothPreset { name } => orchestrator.apply_cloth_preset(&mut ctx, &name),
            Step::Shutdown => orchestrator.shutdown(&mut ctx),
            Step::Advance { frames } => {
                scene.advance_frames(frames);
                CommandOutcome::finished(format!("advanced {frames} frames"))
            }
            Step::Undo { names } => {
                let targets: Vec<Handle> = names.iter().flat_map(|n| scene.find_by_name(n)).collect();
                let removed = scene.simulate_undo(&targets);
                let report = orchestrator.on_undo(&mut ctx);
                CommandOutcome::finished(format!("undo removed {removed} objects, pruned {}", report.removed))
            }
            Step::Reselect => {
                reselect(&scene, &drops)?;
                CommandOutcome::finished("selection restored")
            }
        };

        if !outcome.is_finished() {
            cancelled += 1;
        }
        if config.json {
            let line = Line {
                step,
                command: label,
                outcome: &outcome,
            };
            match serde_json::to_string(&line) {
                Ok(text) => println!("{text}"),
                Err(e) => error!(%e, "could not encode outcome"),
            }
        } else {
            println!("[{step:>3}] {label:<40} {outcome}");
        }
    }

    info!(
        phase = ?ctx.phase(),
        objects = scene.object_count(),
        tracked = ctx.store().handle_count().unwrap_or(0),
        "replay finished"
    );
    Ok(cancelled)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dropsim=info,session_replay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = parse_args();
    match replay(&config) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(cancelled) => {
            info!(cancelled, "some commands were cancelled");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(%err, "replay aborted");
            ExitCode::FAILURE
        }
    }
}
