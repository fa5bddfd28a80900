//! End-to-end runs of the source-to-source pipeline on whole programs.

use crate::{
    config::Config,
    error::KompileError,
    kompiler::{analyzer::SkipReason, compile, Compilation},
    language::parser::parse_file,
    program::load,
};
use std::path::Path;

const CHECKSUM_DEMO: &str = include_str!("../../demos/checksum/main.go");

fn compile_source(source: &str) -> Result<Compilation, KompileError> {
    let program = load(Path::new("main.go"), source)?;
    compile(&program, &Config::default())
}

fn import_paths(compilation_file: &crate::language::ast::File) -> Vec<&str> {
    compilation_file
        .imports
        .iter()
        .map(|import| import.path.as_str())
        .collect()
}

#[test]
fn checksum_demo_splits_into_service_and_controller() {
    let compilation = compile_source(CHECKSUM_DEMO).unwrap();
    assert_eq!(compilation.services.len(), 1);

    let service = &compilation.services[0];
    assert_eq!(service.name, "checksum");
    assert!(service.source.contains("func checksum(data []byte) {"));
    assert!(service.source.contains(
        "\tkompileCallback(\"http://kompile-controller:8080/checksum_result\", id)\n"
    ));
    assert!(service.source.contains("const storeDir = \"/data\""));
    assert!(!service.source.contains("func upload("));
    assert_eq!(
        import_paths(&service.file),
        vec![
            "crypto/sha256",
            "encoding/hex",
            "io",
            "log",
            "net/http",
            "os",
            "path/filepath"
        ]
    );

    let controller = &compilation.controller;
    assert_eq!(controller.services, vec!["checksum"]);
    assert!(controller.source.contains(
        "\tif err := kompileDispatch(\"checksum\", \"application/octet-stream\", bytes.NewReader(data)); err != nil {\n"
    ));
    assert!(!controller.source.contains("ch := make(chan string)"));
    assert!(!controller.source.contains("go checksum("));
    assert!(!controller.source.contains("func checksum("));
    assert!(controller
        .source
        .contains("\tid := <-kompileRoutes[\"checksum_result\"].(chan string)\n"));
    assert!(controller.source.contains("func main() {\n\thttp.HandleFunc(\"/upload\", upload)\n"));
    assert_eq!(
        import_paths(&controller.file),
        vec!["bytes", "encoding/json", "fmt", "io", "log", "net/http"]
    );
}

#[test]
fn generated_programs_parse_again() {
    let compilation = compile_source(CHECKSUM_DEMO).unwrap();
    for service in &compilation.services {
        parse_file(&service.source).unwrap();
    }
    parse_file(&compilation.controller.source).unwrap();
}

#[test]
fn every_callback_url_has_a_controller_route() {
    let compilation = compile_source(
        r#"package main

type Report struct {
	Lines int
	Words int
}

func count(text string, report chan Report, failed chan error) {
	if text == "" {
		failed <- nil
	} else {
		report <- Report{Lines: 1, Words: len(text)}
	}
}

func main() {
	reports := make(chan Report)
	var failures = make(chan error)
	go count("a b", reports, failures)
	select {
	case r := <-reports:
		println(r.Words)
	case <-failures:
		println("failed")
	}
}
"#,
    )
    .unwrap();
    let service = &compilation.services[0];
    let endpoints: Vec<_> = service.callbacks.iter().map(|c| c.endpoint.as_str()).collect();
    assert_eq!(endpoints, vec!["count_report", "count_failed"]);

    let controller = &compilation.controller;
    let routes: Vec<_> = controller.routes.iter().map(|r| r.endpoint.as_str()).collect();
    assert_eq!(routes, vec!["count_failed", "count_report"]);
    for endpoint in endpoints {
        assert!(service
            .source
            .contains(&format!("\"http://kompile-controller:8080/{endpoint}\"")));
        assert!(controller
            .source
            .contains(&format!("http.HandleFunc(\"/{endpoint}\", {endpoint}Handler)")));
    }
    assert!(controller
        .source
        .contains("\tcase r := <-kompileRoutes[\"count_report\"].(chan Report):\n"));
    assert!(controller
        .source
        .contains("\tcase <-kompileRoutes[\"count_failed\"].(chan error):\n"));
    assert!(controller.source.contains("type Report struct {"));
    assert!(service.source.contains("type Report struct {"));
    assert!(controller
        .source
        .contains("kompileDispatch(\"count\", \"text/plain; charset=utf-8\", strings.NewReader(\"a b\"))"));
}

#[test]
fn same_parameter_names_get_distinct_endpoints() {
    let compilation = compile_source(
        "package main\n\nfunc funcA(result chan int) {\n\tresult <- 1\n}\n\nfunc funcB(result chan int) {\n\tresult <- 2\n}\n\nfunc main() {\n\ta := make(chan int)\n\tb := make(chan int)\n\tgo funcA(a)\n\tgo funcB(b)\n\tprintln(<-a + <-b)\n}\n",
    )
    .unwrap();
    let routes: Vec<_> = compilation
        .controller
        .routes
        .iter()
        .map(|route| route.endpoint.as_str())
        .collect();
    assert_eq!(routes, vec!["funcA_result", "funcB_result"]);
    assert!(compilation.controller.source.contains(
        "\tprintln(<-kompileRoutes[\"funcA_result\"].(chan int) + <-kompileRoutes[\"funcB_result\"].(chan int))\n"
    ));
    assert!(compilation
        .controller
        .source
        .contains("kompileDispatch(\"funcA\", \"application/octet-stream\", http.NoBody)"));
}

#[test]
fn programs_without_launches_pass_through() {
    let source = "package main\n\nimport \"fmt\"\n\nfunc work(n int) int {\n\treturn n * 2\n}\n\nfunc main() {\n\tfmt.Println(work(2))\n}\n";
    let compilation = compile_source(source).unwrap();
    assert!(compilation.services.is_empty());
    assert!(compilation.analysis.sites.is_empty());
    assert_eq!(compilation.controller.source, source);
}

#[test]
fn unresolved_launches_stay_goroutines() {
    let source = "package main\n\nfunc main() {\n\tch := make(chan int)\n\twork := func(out chan int) {\n\t\tout <- 1\n\t}\n\tgo work(ch)\n\tgo func() {\n\t\tch <- 2\n\t}()\n\tprintln(<-ch, <-ch)\n}\n";
    let compilation = compile_source(source).unwrap();
    assert!(compilation.services.is_empty());
    assert!(compilation.controller.routes.is_empty());
    assert_eq!(compilation.controller.source, source);
    assert!(compilation
        .analysis
        .skipped
        .iter()
        .all(|skipped| skipped.reason == SkipReason::UnresolvedCallee));
    assert_eq!(compilation.analysis.skipped.len(), 2);
}

#[test]
fn double_sends_abort_the_compilation() {
    let err = compile_source(
        "package main\n\nfunc twice(out chan int) {\n\tout <- 1\n\tout <- 2\n}\n\nfunc main() {\n\tch := make(chan int)\n\tgo twice(ch)\n\tprintln(<-ch)\n}\n",
    )
    .unwrap_err();
    match err {
        KompileError::TooManySends {
            function, channel, ..
        } => {
            assert_eq!(function, "twice");
            assert_eq!(channel, "out");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn shared_package_state_is_rejected() {
    let err = compile_source(
        "package main\n\nvar hits int\n\nfunc track(out chan int) {\n\thits++\n\tout <- hits\n}\n\nfunc main() {\n\tch := make(chan int)\n\tgo track(ch)\n\tprintln(<-ch)\n}\n",
    )
    .unwrap_err();
    assert!(matches!(err, KompileError::GlobalStateReference { ref name, .. } if name == "hits"));
}

#[test]
fn duplicate_functions_are_parse_errors() {
    let err = compile_source("package main\n\nfunc a() {}\n\nfunc a() {}\n\nfunc main() {}\n")
        .unwrap_err();
    assert!(matches!(err, KompileError::Parse { .. }));
}
