//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `componentry_core` linkage with a tiny in-memory catalog.
//! - Keep output deterministic for quick local sanity checks.

use componentry_core::{
    ContractKey, DuplicatePolicy, ExportCandidate, ExportManager, ImplementationId, Location,
    ModuleDescriptor, ModuleId, RegistryResult, StaticCatalog,
};
use std::sync::Arc;

trait Shape: Send + Sync {
    fn describe(&self) -> String;
}

struct Circle;
struct Square;

impl Shape for Circle {
    fn describe(&self) -> String {
        "circle".to_string()
    }
}

impl Shape for Square {
    fn describe(&self) -> String {
        "square".to_string()
    }
}

type DynShape = Box<dyn Shape>;

fn main() {
    println!("componentry_core version={}", componentry_core::core_version());
    if let Err(err) = run() {
        eprintln!("componentry probe failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> RegistryResult<()> {
    let shape = ContractKey::parse("Shape", None)?;
    let circle = ImplementationId::new("Circle")?;
    let square = ImplementationId::new("Square")?;
    let base = ModuleId::new("demo.base")?;
    let overlay = ModuleId::new("demo.overlay")?;
    let slot = Location::derive(&shape, &circle);

    let catalog = StaticCatalog::new()
        .implementation(
            circle.clone(),
            componentry_core::Factory::of(|| Box::new(Circle) as DynShape),
        )
        .implementation(
            square.clone(),
            componentry_core::Factory::of(|| Box::new(Square) as DynShape),
        )
        .export(base.clone(), ExportCandidate::new(shape.clone(), circle))
        .export(
            overlay.clone(),
            ExportCandidate::new(shape.clone(), square).at(slot.clone()),
        );

    let manager = ExportManager::builder().catalog(Arc::new(catalog)).build()?;
    manager.load_module(ModuleDescriptor::new(base, "1.0.0"))?;
    print_resolution(&manager, &slot)?;

    manager.load_module(
        ModuleDescriptor::new(overlay.clone(), "1.0.0").with_policy(DuplicatePolicy::OverrideExisting),
    )?;
    print_resolution(&manager, &slot)?;

    manager.unload_module(&overlay);
    print_resolution(&manager, &slot)?;
    println!("componentry_core exports={}", manager.get_exports(&shape).len());
    Ok(())
}

fn print_resolution(manager: &ExportManager, location: &Location) -> RegistryResult<()> {
    match manager.get_typed_export::<DynShape>(location) {
        Some(export) => println!(
            "componentry_core resolve {} -> {} ({})",
            location,
            export.instance()?.describe(),
            export.record().full_name()
        ),
        None => println!("componentry_core resolve {location} -> none"),
    }
    Ok(())
}
