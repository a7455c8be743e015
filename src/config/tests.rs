use std::path::PathBuf;

use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(settings.render.cache_enabled);
    assert_eq!(
        settings.render.cache_capacity.get(),
        DEFAULT_RENDER_CACHE_CAPACITY
    );
    assert_eq!(settings.render.cache_ttl, Duration::from_secs(3600));
    assert_eq!(settings.comments.max_content_chars, 1000);
    assert_eq!(settings.comments.max_nickname_chars, 50);
    assert_eq!(settings.http.timeout, Duration::from_secs(10));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.render.cache_capacity = Some(50);

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        render_cache_capacity: Some(8),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.render.cache_capacity.get(), 8);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_sizes_are_rejected() {
    let mut raw = RawSettings::default();
    raw.render.cache_capacity = Some(0);
    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "render.cache_capacity",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.notifications.workers = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.comments.page_size = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn blank_salt_is_rejected() {
    let mut raw = RawSettings::default();
    raw.identifiers.salt = Some("   ".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn unparsable_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from(["threadline", "render", "comment.md"]);
    match args.command {
        Command::Render(render) => assert_eq!(render.file, PathBuf::from("comment.md")),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_thread_arguments() {
    let args = CliArgs::parse_from([
        "threadline",
        "thread",
        "bundle.zip",
        "--path",
        "/posts/hello",
        "--page",
        "2",
        "--log-level",
        "warn",
    ]);

    assert_eq!(args.overrides.log_level.as_deref(), Some("warn"));
    match args.command {
        Command::Thread(thread) => {
            assert_eq!(thread.bundle, PathBuf::from("bundle.zip"));
            assert_eq!(thread.path, "/posts/hello");
            assert_eq!(thread.page, 2);
            assert_eq!(thread.page_size, None);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_pack_arguments() {
    let args = CliArgs::parse_from([
        "threadline",
        "--render-cache-enabled",
        "false",
        "pack",
        "comments.json",
        "out.zip",
    ]);

    assert_eq!(args.overrides.render_cache_enabled, Some(false));
    match args.command {
        Command::Pack(pack) => {
            assert_eq!(pack.bundle, PathBuf::from("comments.json"));
            assert_eq!(pack.out, PathBuf::from("out.zip"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn config_file_is_layered_under_cli() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("threadline.toml");
    std::fs::write(
        &path,
        "[comments]\nmax_content_chars = 200\n\n[logging]\nlevel = \"error\"\n",
    )
    .expect("write config");

    let args = CliArgs::parse_from([
        "threadline",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "--log-level",
        "trace",
        "render",
        "x.md",
    ]);
    let settings = load(&args).expect("valid settings");

    assert_eq!(settings.comments.max_content_chars, 200);
    assert_eq!(settings.logging.level, LevelFilter::TRACE);
}

#[test]
fn parse_submit_with_site_settings() {
    let args = CliArgs::parse_from([
        "threadline",
        "submit",
        "nice post",
        "--path",
        "/posts/a",
        "--nickname",
        "Ada",
        "--set",
        "PUSH_URL=https://push.example.com/hook?a=b",
        "--set",
        "NOTIFY_ADMIN=true",
    ]);

    assert_eq!(
        args.site_settings,
        vec![
            (
                "PUSH_URL".to_string(),
                "https://push.example.com/hook?a=b".to_string()
            ),
            ("NOTIFY_ADMIN".to_string(), "true".to_string()),
        ]
    );
    match args.command {
        Command::Submit(submit) => {
            assert_eq!(submit.content, "nice post");
            assert_eq!(submit.ip, "127.0.0.1");
            assert!(submit.bundle.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn site_setting_without_separator_is_rejected() {
    let err = CliArgs::try_parse_from(["threadline", "--set", "NOTIFY_ADMIN", "qq", "10001"])
        .unwrap_err();
    assert!(err.to_string().contains("KEY=VALUE"));
}
