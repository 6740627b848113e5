mod tests {
    use crate::*;

    #[test]
    fn test_sanitize_path_allows_simple_relative() {
        let p = sanitize_path("foo/bar.luac").expect("relative path should be allowed");
        assert_eq!(p, PathBuf::from("foo/bar.luac"));
    }

    #[test]
    fn test_sanitize_path_rejects_parent_dir() {
        let err = sanitize_path("foo/../bar.luac").unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[test]
    fn test_cli_args_reject_parent_dir_in_inspect() {
        let err = CliArgs::try_parse_from(["lume", "inspect", "../x.luac"]).unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[test]
    fn test_trace_toggle_grammar() {
        assert!(env_toggle_enabled("1"));
        assert!(env_toggle_enabled("lume::gc=trace"));
        assert!(!env_toggle_enabled(" off "));
        assert!(!env_toggle_enabled(""));
        assert_eq!(filter_expr_from("true"), None);
        assert_eq!(filter_expr_from(" lume::gc=trace "), Some("lume::gc=trace".to_string()));
    }

    #[test]
    fn test_stress_keeps_ring_alive() {
        let report = stress(2_000, 50, RuntimeConfig::default()).unwrap();
        assert_eq!(report.objects, 2_000);
        assert_eq!(report.kept, 50);
        assert!(report.gc.cycles >= 1);
        assert!(report.gc.objects_freed > 0);
        assert!(report.census.get("table").copied().unwrap_or(0) >= 1);
        let text = render_report(&report);
        assert!(text.contains("kept          50"));
    }

    #[test]
    fn test_stress_without_ring() {
        let report = stress(100, 0, RuntimeConfig::default()).unwrap();
        assert_eq!(report.kept, 0);
    }

    #[test]
    fn test_load_config_defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }
}
