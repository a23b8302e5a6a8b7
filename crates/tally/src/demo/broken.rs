use tally_core::ModuleRegistry;

/// A module whose setup fails before any test runs.
pub fn register(registry: &mut ModuleRegistry) {
    registry.register(file!(), |m| -> Result<(), String> {
        m.test("never collected", |_| {});
        let fixture = std::env::var("TALLY_DEMO_FIXTURE")
            .map_err(|_| String::from("TALLY_DEMO_FIXTURE is not set"))?;
        m.test("reads fixture", move |_| assert!(!fixture.is_empty()));
        Ok(())
    });
}
