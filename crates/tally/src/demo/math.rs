use tally_core::ModuleRegistry;

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

pub fn register(registry: &mut ModuleRegistry) {
    registry.register(file!(), |m| {
        m.test("arithmetic", |t| {
            let base = 6;
            t.test("adds", move |_| assert_eq!(base + 1, 7));
            t.test("multiplies", move |_| assert_eq!(base * 7, 42));
            t.test("checked overflow", |_| assert_eq!(u8::MAX.checked_add(1), None));
        });

        m.test("gcd", |t| {
            for (a, b, expected) in [(12, 18, 6), (17, 5, 1), (0, 9, 9)] {
                t.test(&format!("gcd({a}, {b})"), move |_| {
                    assert_eq!(gcd(a, b), expected);
                });
            }
            t.test("is commutative", |t| {
                t.test("small", |_| assert_eq!(gcd(4, 10), gcd(10, 4)));
                t.test("large", |_| assert_eq!(gcd(1 << 40, 96), gcd(96, 1 << 40)));
            });
        });
    });
}
