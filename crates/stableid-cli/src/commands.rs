//! Command implementations.
//!
//! Plain text goes to stdout, one record per line, so output can be piped.

use anyhow::{bail, Context as _, Result};
use serde_json::json;
use stableid_core::{
    ContainerEvent, Discrepancy, IdRegistry, ObjectGraph, ObjectKey, PersistentId, RegistryConfig,
    RepairPlan, SceneDirectory, SceneWatcher, ScopeKey, Settings, ValidationReport,
};
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use tracing::{error, info, warn};

/// Everything a command needs: settings, the open registry and the scenes.
pub struct Context {
    settings: Settings,
    registry: IdRegistry,
    scenes: SceneDirectory,
}

impl Context {
    pub fn open(root: &Path) -> Result<Self> {
        let settings = Settings::load(root)?;
        let registry = IdRegistry::open(&settings)?;
        let scenes = SceneDirectory::from_settings(&settings);
        Ok(Self {
            settings,
            registry,
            scenes,
        })
    }
}

/// Parse `ID=SCOPE/OBJECT` for `repair --keep`.
pub fn parse_keep(value: &str) -> std::result::Result<(PersistentId, ObjectKey), String> {
    let (id, object) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ID=SCOPE/OBJECT, got '{}'", value))?;
    let id: PersistentId = id.trim().parse().map_err(|e| format!("{}", e))?;
    let object = object.trim();
    if object.is_empty() {
        return Err(format!("missing object in '{}'", value));
    }
    Ok((id, ObjectKey::new(object)))
}

fn scope_key(raw: &str) -> Result<ScopeKey> {
    Ok(ScopeKey::new(raw)?)
}

// ========================================
// Registry commands
// ========================================

pub fn status(ctx: Context, as_json: bool) -> Result<()> {
    let scene_count = ctx.scenes.scopes()?.len();
    if as_json {
        let value = json!({
            "registryPath": ctx.settings.registry_file(),
            "scenesPath": ctx.settings.scenes_path(),
            "registered": ctx.registry.registered_count(),
            "scopes": ctx.registry.scopes().len(),
            "scenes": scene_count,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("registry:   {}", ctx.settings.registry_file().display());
    println!("scenes:     {}", ctx.settings.scenes_path().display());
    println!("registered: {}", ctx.registry.registered_count());
    println!("scopes:     {}", ctx.registry.scopes().len());
    println!("scene files: {}", scene_count);
    Ok(())
}

pub fn list(ctx: Context, scope: Option<&str>) -> Result<()> {
    let scopes = match scope {
        Some(raw) => vec![scope_key(raw)?],
        None => ctx.registry.scopes(),
    };
    for scope in scopes {
        for id in ctx.registry.identifiers_in_scope(&scope) {
            println!("{}\t{}", scope, id);
        }
    }
    Ok(())
}

pub fn allocate(mut ctx: Context, scope: &str) -> Result<()> {
    let id = ctx.registry.allocate(&scope_key(scope)?)?;
    println!("{}", id);
    Ok(())
}

pub fn register(mut ctx: Context, scope: &str, id: PersistentId) -> Result<()> {
    ctx.registry.register(&scope_key(scope)?, id)?;
    println!("{}", id);
    Ok(())
}

/// Regenerate an object's identifier. When the object exists in its scene
/// file the new value is written back there too.
pub fn regenerate(
    mut ctx: Context,
    object: &str,
    scope: &str,
    current: Option<PersistentId>,
) -> Result<()> {
    let scope = scope_key(scope)?;
    let key = ObjectKey::scoped(&scope, object);

    let live = ctx
        .scenes
        .live_objects(&scope)?
        .into_iter()
        .find(|o| o.object == key);
    let current = current
        .or_else(|| live.as_ref().map(|o| o.id))
        .unwrap_or(PersistentId::UNASSIGNED);

    let fresh = ctx.registry.regenerate(&key, current, &scope)?;
    if let Some(mut live) = live {
        live.id = fresh;
        ctx.scenes
            .assign_many(&scope, &[live])
            .with_context(|| format!("writing {} back to scene '{}'", fresh, scope))?;
    }
    println!("{}", fresh);
    Ok(())
}

pub fn unregister(mut ctx: Context, id: PersistentId) -> Result<()> {
    match ctx.registry.unregister_id(id)? {
        Some(scope) => println!("{} removed from '{}'", id, scope),
        None => println!("{} was not registered", id),
    }
    Ok(())
}

pub fn remove_scope(mut ctx: Context, scope: &str) -> Result<()> {
    let released = ctx.registry.remove_scope(&scope_key(scope)?)?;
    println!("released {} identifiers", released.len());
    Ok(())
}

pub fn rename_scope(mut ctx: Context, from: &str, to: &str) -> Result<()> {
    ctx.registry.rename_scope(&scope_key(from)?, &scope_key(to)?)?;
    println!("'{}' -> '{}'", from, to);
    Ok(())
}

// ========================================
// Scene commands
// ========================================

pub fn assign(mut ctx: Context) -> Result<()> {
    let changes = ctx.registry.assign_pass(&mut ctx.scenes)?;
    for change in &changes {
        println!(
            "{}\t{}\t{} -> {}",
            change.scope, change.object, change.previous, change.assigned
        );
    }
    info!("{} objects assigned", changes.len());
    Ok(())
}

pub fn duplicate_scene(mut ctx: Context, from: &str, to: &str) -> Result<()> {
    let from_scope = scope_key(from)?;
    let to_scope = scope_key(to)?;

    let reassigned = ctx
        .registry
        .duplicate_scene(&ctx.scenes, &from_scope, &to_scope)?;

    println!(
        "duplicated '{}' to '{}' ({} identifiers reissued)",
        from_scope,
        to_scope,
        reassigned.len()
    );
    Ok(())
}

pub fn validate(ctx: Context, as_json: bool) -> Result<()> {
    let report = ctx.registry.validate_registry(&ctx.scenes)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

pub fn repair(mut ctx: Context, plan: &RepairPlan, confirmed: bool) -> Result<()> {
    let report = ctx.registry.validate_registry(&ctx.scenes)?;
    if report.is_clean() {
        println!("registry is clean; nothing to repair");
        return Ok(());
    }
    if !confirmed {
        print_report(&report);
        bail!("refusing to modify the registry without --yes");
    }

    let summary = ctx.registry.repair(&mut ctx.scenes, &report, plan)?;
    for change in &summary.reassigned {
        println!(
            "{}\t{}\t{} -> {}",
            change.scope, change.object, change.previous, change.assigned
        );
    }
    println!(
        "dropped {} orphans, registered {}, relocated {}, reassigned {}, skipped {}",
        summary.orphans_dropped,
        summary.registered,
        summary.relocated,
        summary.reassigned.len(),
        summary.skipped
    );
    Ok(())
}

fn print_report(report: &ValidationReport) {
    println!(
        "checked {} scenes, {} objects, {} registered identifiers",
        report.scopes_scanned, report.live_objects, report.registered
    );
    for scope in &report.missing_scopes {
        println!("missing scene: {}", scope);
    }
    for discrepancy in &report.discrepancies {
        println!("{}", describe(discrepancy));
    }
    if report.is_clean() {
        println!("ok");
    }
}

fn describe(discrepancy: &Discrepancy) -> String {
    match discrepancy {
        Discrepancy::OrphanedIdentifier { scope, id } => {
            format!("orphaned: {} in '{}' is held by no object", id, scope)
        }
        Discrepancy::UnregisteredLiveIdentifier { scope, object, id } => {
            format!("unregistered: {} on {} (scene '{}')", id, object, scope)
        }
        Discrepancy::CrossScopeDuplicate { id, holders } => {
            let names: Vec<String> = holders.iter().map(|(_, o)| o.to_string()).collect();
            format!("duplicate: {} held by {}", id, names.join(", "))
        }
        Discrepancy::MisplacedIdentifier {
            id,
            registered_scope,
            live_scope,
            object,
        } => format!(
            "misplaced: {} on {} is registered under '{}' but lives in '{}'",
            id, object, registered_scope, live_scope
        ),
    }
}

// ========================================
// Watch
// ========================================

pub fn watch(ctx: Context) -> Result<()> {
    let Context {
        settings,
        registry,
        scenes,
    } = ctx;
    std::fs::create_dir_all(scenes.root())
        .with_context(|| format!("creating {}", scenes.root().display()))?;

    let auto_assign = settings.auto_assign_on_change;
    let registry = Arc::new(Mutex::new(registry));

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    let handler_registry = Arc::clone(&registry);
    let handler_scenes = scenes.clone();
    let watcher = SceneWatcher::new(
        &scenes,
        RegistryConfig::WATCH_DEBOUNCE,
        Box::new(move |event| {
            let Ok(mut registry) = handler_registry.lock() else {
                error!("Registry lock poisoned; dropping {:?}", event);
                return;
            };
            on_scene_event(&mut registry, &handler_scenes, event, auto_assign);
        }),
    )?;

    println!("watching {} (Ctrl+C to stop)", scenes.root().display());
    let _ = stop_rx.recv();
    watcher.stop();
    info!("Watch stopped");
    Ok(())
}

fn on_scene_event(
    registry: &mut IdRegistry,
    scenes: &SceneDirectory,
    event: ContainerEvent,
    auto_assign: bool,
) {
    match event {
        ContainerEvent::Deleted(scope) => match registry.container_deleted(scope.as_str()) {
            Ok(released) => println!("deleted '{}' ({} released)", scope, released.len()),
            Err(e) => warn!("Failed to release scope '{}': {}", scope, e),
        },
        ContainerEvent::Changed(scope) => {
            if !auto_assign {
                return;
            }
            let mut graph = scenes.clone();
            match registry.assign_pass(&mut graph) {
                Ok(changes) => {
                    for change in changes {
                        println!(
                            "{}\t{}\t{} -> {}",
                            change.scope, change.object, change.previous, change.assigned
                        );
                    }
                }
                Err(e) => warn!("Assignment after change to '{}' failed: {}", scope, e),
            }
        }
    }
}
