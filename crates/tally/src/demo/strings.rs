use tally_core::ModuleRegistry;

pub fn register(registry: &mut ModuleRegistry) {
    registry.register(file!(), |m| {
        m.test("case", |t| {
            t.test("upper", |_| assert_eq!("tally".to_uppercase(), "TALLY"));
            t.test("sharp s", |_| assert_eq!("straße".to_uppercase(), "STRASSE"));
        });

        // Fails on purpose: `>` right-aligns.
        m.test("pads to width", |_| -> Result<(), String> {
            let padded = format!("{:>4}", "ab");
            if padded == "ab  " {
                Ok(())
            } else {
                Err(format!("expected `ab  `, found `{padded}`"))
            }
        });
    });
}
