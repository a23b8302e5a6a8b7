use tally_core::ModuleRegistry;

mod broken;
mod math;
mod strings;

pub fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    math::register(&mut registry);
    strings::register(&mut registry);
    broken::register(&mut registry);
    registry
}
