use dispatch_errors::{
    ClassifiedError, CodeGroup, OrThrow, Outcome, catch, define_codes, protect, throw_with_context,
};

define_codes! {
    BAD_REQUEST = 400,
    FORBIDDEN = 403,
    NOT_FOUND = 404,
    SERVER_ERROR = 500,
}

fn find_user(id: i64) -> String {
    if id != 1 {
        throw_with_context(NOT_FOUND, "user not found", "user_id", id);
    }
    "ana".to_owned()
}

fn parse_port(raw: &str) -> u16 {
    raw.parse::<u16>().or_throw_code_with_context(BAD_REQUEST, "input", raw.to_owned())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dispatch_errors=debug")),
        )
        .init();

    println!("--- Basic Usage Example ---\n");

    // SCENARIO 1: a specific handler plus a global one
    println!("1. [SPECIFIC] Looking up a missing user:");
    let outcome = protect(|| {
        let name = find_user(42);
        println!("   found {name}");
    })
    .on_code(NOT_FOUND, |err| {
        println!(
            "   404 handler: {} (user_id={:?})",
            err.message(),
            err.context_i64("user_id")
        );
    })
    .on_any(|err| println!("   global handler saw code {}", err.code()))
    .run_with_finally(|| println!("   finally: request closed"));
    println!("   outcome: {outcome:?}\n");

    // SCENARIO 2: a group handler, with the fallback covering the missing specific
    println!("2. [GROUP] Parsing a bad port:");
    let client_errors = CodeGroup::from([BAD_REQUEST, FORBIDDEN, NOT_FOUND]);
    let outcome = protect(|| {
        let port = parse_port("http");
        println!("   listening on {port}");
    })
    .on_group(client_errors, |err| {
        println!(
            "   client error: {} (input={:?})",
            err.message(),
            err.context_str("input")
        );
    })
    .on_unmatched(|err| println!("   no specific handler for {}", err.code()))
    .run();
    println!("   outcome: {outcome:?}\n");

    // SCENARIO 3: an unclaimed code escapes to the caller
    println!("3. [PROPAGATION] Unhandled server error:");
    let escaped = catch(|| {
        let _ = protect(|| dispatch_errors::throw(SERVER_ERROR, "database unavailable"))
            .on_code(NOT_FOUND, |_| println!("   never printed"))
            .run();
    });
    match escaped {
        Ok(()) => println!("   nothing escaped"),
        Err(err) => println!("   escaped: [{}] {}", err.code(), err.message()),
    }
    println!();

    // SCENARIO 4: the internal log view
    println!("4. [LOG VIEW] What operators see:");
    let err = ClassifiedError::without_stack(FORBIDDEN, "token expired")
        .with_context("subject", "svc-billing")
        .with_context("expired_secs", 93u32);
    println!("   {}", err.log());

    let filtered = protect(|| err.raise())
        .filter(|err| err.context_str("subject") != Some("svc-billing"))
        .run();
    assert_eq!(filtered, Outcome::Filtered);
    println!("   filtered for internal subjects: {filtered:?}");
}
