use super::*;

#[test]
fn test_cli_parse_call() {
    let args: Cli = Cli::from_args(&["arpc"], &["call", "http://127.0.0.1:8080", "echo.string", "\"hello\""]).unwrap();
    match args.command {
        Commands::Call(CallArgs {
            server_address,
            route,
            arg,
            version,
            get,
            token,
            token_type,
        }) => {
            assert_eq!(server_address, "http://127.0.0.1:8080");
            assert_eq!(route, "echo.string");
            assert_eq!(arg.as_deref(), Some("\"hello\""));
            assert_eq!(version, "v1"); // default
            assert!(!get);
            assert!(token.is_none());
            assert_eq!(token_type, "ApiKey"); // default
        }
        _ => panic!("Expected Call command"),
    }
}

#[test]
fn test_cli_parse_call_without_argument() {
    let args: Cli = Cli::from_args(&["arpc"], &["call", "http://127.0.0.1:8080", "number"]).unwrap();
    match args.command {
        Commands::Call(CallArgs { route, arg, .. }) => {
            assert_eq!(route, "number");
            assert!(arg.is_none());
        }
        _ => panic!("Expected Call command"),
    }
}

#[test]
fn test_cli_parse_call_with_options() {
    let args: Cli = Cli::from_args(
        &["arpc"],
        &[
            "call",
            "http://127.0.0.1:8080",
            "whoami",
            "--get",
            "-v",
            "v2",
            "--token",
            "secret",
            "--token-type",
            "Bearer",
        ],
    )
    .unwrap();
    match args.command {
        Commands::Call(CallArgs {
            version,
            get,
            token,
            token_type,
            ..
        }) => {
            assert_eq!(version, "v2");
            assert!(get);
            assert_eq!(token.as_deref(), Some("secret"));
            assert_eq!(token_type, "Bearer");
        }
        _ => panic!("Expected Call command"),
    }
}

#[test]
fn test_cli_parse_atomic() {
    let args: Cli = Cli::from_args(&["arpc"], &["atomic", "http://127.0.0.1:8080", "[[\"number\", null]]"]).unwrap();
    match args.command {
        Commands::Atomic(AtomicArgs { program, version, .. }) => {
            assert_eq!(program, "[[\"number\", null]]");
            assert_eq!(version, "v1");
        }
        _ => panic!("Expected Atomic command"),
    }
}

#[test]
fn test_cli_parse_demo() {
    let args: Cli = Cli::from_args(
        &["arpc"],
        &[
            "demo",
            "-b",
            "127.0.0.1:9000",
            "--api-key",
            "secret",
            "--rate-limit-rps",
            "50",
            "--max-body-bytes",
            "4096",
        ],
    )
    .unwrap();
    match args.command {
        Commands::Demo(DemoArgs {
            bind,
            max_body_bytes,
            api_key,
            rate_limit_rps,
        }) => {
            assert_eq!(bind.as_deref(), Some("127.0.0.1:9000"));
            assert_eq!(max_body_bytes, Some(4096));
            assert_eq!(api_key.as_deref(), Some("secret"));
            assert_eq!(rate_limit_rps, Some(50.0));
        }
        _ => panic!("Expected Demo command"),
    }
}

#[test]
fn test_cli_missing_route() {
    assert!(Cli::from_args(&["arpc"], &["call", "http://127.0.0.1:8080"]).is_err());
}

#[test]
fn test_demo_flags_override_config() {
    let args = DemoArgs {
        bind: Some("127.0.0.1:9000".to_string()),
        max_body_bytes: Some(4096),
        api_key: None,
        rate_limit_rps: None,
    };
    let config = args.server_config().unwrap();
    assert_eq!(config.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    assert_eq!(config.max_body_bytes, 4096);
}

#[test]
fn test_demo_rejects_bad_flags() {
    let args = DemoArgs {
        bind: Some("not-an-address".to_string()),
        max_body_bytes: None,
        api_key: None,
        rate_limit_rps: None,
    };
    assert!(args.server_config().is_err());

    let args = DemoArgs {
        bind: None,
        max_body_bytes: Some(0),
        api_key: None,
        rate_limit_rps: None,
    };
    assert!(args.server_config().is_err());
}

#[tokio::test]
async fn test_build_client_requires_http_prefix() {
    assert!(build_client("127.0.0.1:8080", "v1", "ApiKey", None).is_err());
    assert!(build_client("http://127.0.0.1:8080", "v1", "ApiKey", Some("secret")).is_ok());
}

#[test]
fn test_parse_json() {
    assert_eq!(parse_json("[1, 2]", "program").unwrap(), serde_json::json!([1, 2]));
    let err = parse_json("{nope", "argument").unwrap_err();
    assert!(err.to_string().contains("Invalid JSON in argument"));
}
