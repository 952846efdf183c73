mod tests {
    use crate::*;

    #[test]
    fn test_sanitize_path_allows_simple_relative() {
        let p = sanitize_path("progs/fib.sw").expect("relative path should be allowed");
        assert_eq!(p, PathBuf::from("progs/fib.sw"));
    }

    #[test]
    fn test_sanitize_path_rejects_parent_dir() {
        let err = sanitize_path("progs/../fib.sw").unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitize_path_allows_absolute_unix() {
        let p = sanitize_path("/tmp/fib.sw").expect("absolute path should be allowed");
        assert_eq!(p, PathBuf::from("/tmp/fib.sw"));
    }

    #[test]
    fn test_cli_args_rejects_parent_dir_in_run() {
        let err = CliArgs::try_parse_from(["swallow", "run", "a/../b.sw"]).unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[test]
    fn test_cli_args_run_collects_literal_args() {
        let args = CliArgs::try_parse_from(["swallow", "run", "a.sw", "--jit", "--level", "O1", "3", "'x'"])
            .expect("should parse");
        let Commands::Run {
            file, jit, level, args, ..
        } = args.command
        else {
            panic!("expected run command");
        };
        assert_eq!(file, PathBuf::from("a.sw"));
        assert!(jit);
        assert_eq!(level, Some(OptLevel::O1));
        assert_eq!(args, vec!["3", "'x'"]);
    }

    #[test]
    fn test_cli_args_config_is_global() {
        let args = CliArgs::try_parse_from(["swallow", "ir", "a.sw", "--config", "jit.toml", "--level", "3"])
            .expect("should parse");
        assert_eq!(args.config.as_deref(), Some(Path::new("jit.toml")));
        assert!(matches!(
            args.command,
            Commands::Ir {
                level: Some(OptLevel::O3),
                ..
            }
        ));
    }

    #[test]
    fn test_cli_args_rejects_unknown_level() {
        assert!(CliArgs::try_parse_from(["swallow", "ir", "a.sw", "--level", "7"]).is_err());
    }

    #[test]
    fn test_env_toggle_and_filter() {
        assert!(env_toggle_enabled("1"));
        assert!(env_toggle_enabled("swallow_core=debug"));
        assert!(!env_toggle_enabled(" off "));
        assert!(!env_toggle_enabled(""));
        assert_eq!(filter_expr_from("true"), None);
        assert_eq!(filter_expr_from("swallow_core=trace").as_deref(), Some("swallow_core=trace"));
    }

    #[test]
    fn test_parse_args_reports_the_bad_literal() {
        let values = parse_args(&["1".to_string(), "(2, 'b')".to_string()]).expect("literals parse");
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].as_int(), Some(1));
        let err = parse_args(&["nope(".to_string()]).unwrap_err();
        assert!(err.to_string().contains("nope("));
    }

    #[test]
    fn test_check_modes_cover_every_level() {
        let modes = check_modes(&JitConfig::default());
        let names: Vec<_> = modes.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["interpreted", "O0", "O1", "O2", "O3"]);
        assert!(!modes[0].1.enabled);
        assert!(modes[1..].iter().all(|(_, c)| c.enabled && c.compile_all));
    }
}
