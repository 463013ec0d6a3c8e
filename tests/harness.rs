//! End-to-end runs through `load_and_run`, over both source paths.
//!
//! URL sources are served by a throwaway HTTP/1.1 server on a loopback
//! port that writes the body in small chunks, so the streaming decoder sees
//! the module arrive piece by piece.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use wasm_harness::config::HarnessConfig;
use wasm_harness::wasm::{
    ImportsSpec, MemorySink, ModuleSource, RunResult, Stage, Value, WasmHarness,
};

const MERGED: &str = r#"(module
    (func (export "add") (param i32) (result i32)
      local.get 0 i32.const 1 i32.add)
    (func (export "add_inc") (param i32 i32) (result i32)
      local.get 0 local.get 1 i32.add))"#;

const HELLO: &str = r#"(module
    (import "env" "print_string" (func $print_string (param i32 i32)))
    (memory (export "memory") 1)
    (data (i32.const 1024) "hello")
    (func (export "main") (result i32)
      i32.const 1024
      i32.const 5
      call $print_string
      i32.const 0))"#;

/// Bumps a global in linear memory each call; a leaked instance would show
/// up as a growing count.
const COUNTER: &str = r#"(module
    (import "env" "print_string" (func $print_string (param i32 i32)))
    (memory (export "memory") 1)
    (data (i32.const 0) "0")
    (func (export "main") (result i32)
      i32.const 0
      i32.const 0
      i32.load8_u
      i32.const 1
      i32.add
      i32.store8
      i32.const 0
      i32.const 1
      call $print_string
      i32.const 0
      i32.load8_u))"#;

fn wasm(text: &str) -> Vec<u8> {
    wat::parse_str(text).expect("valid WAT")
}

fn harness() -> (WasmHarness, Arc<MemorySink>) {
    let config = HarnessConfig {
        use_proxy: false,
        ..Default::default()
    };
    let sink = Arc::new(MemorySink::new());
    let harness = WasmHarness::new(&config).unwrap().with_sink(sink.clone());
    (harness, sink)
}

fn write_module(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> ModuleSource {
    let path: PathBuf = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    ModuleSource::Path(path)
}

/// Serve `body` with `status` to every connection; returns the module URL.
async fn serve(status: &'static str, body: Vec<u8>) -> ModuleSource {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let header = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/wasm\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                if socket.write_all(header.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in body.chunks(7) {
                    if socket.write_all(chunk).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    ModuleSource::Url(format!("http://{addr}/module.wasm"))
}

#[tokio::test]
async fn add_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(&dir, "merged.wasm", &wasm(MERGED));
    let (harness, _) = harness();

    let result = harness
        .load_and_run(&source, "add", &[Value::I32(4)], &ImportsSpec::none())
        .await;
    assert_eq!(result.value(), Some(Value::I32(5)));
}

#[tokio::test]
async fn add_inc_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(&dir, "merged.wasm", &wasm(MERGED));
    let (harness, _) = harness();

    let result = harness
        .load_and_run(
            &source,
            "add_inc",
            &[Value::I32(4), Value::I32(2)],
            &ImportsSpec::none(),
        )
        .await;
    assert_eq!(result.value(), Some(Value::I32(6)));
}

#[tokio::test]
async fn hello_over_http() {
    let source = serve("200 OK", wasm(HELLO)).await;
    let (harness, sink) = harness();

    let result = harness
        .load_and_run(&source, "main", &[], &ImportsSpec::print_string())
        .await;
    assert_eq!(result.value(), Some(Value::I32(0)), "{result}");
    assert_eq!(sink.lines(), vec!["hello"]);
}

#[tokio::test]
async fn print_string_lines_arrive_in_call_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(
        &dir,
        "two_lines.wasm",
        &wasm(
            r#"(module
                 (import "env" "print_string" (func $print_string (param i32 i32)))
                 (memory (export "memory") 1)
                 (data (i32.const 0) "first")
                 (data (i32.const 8) "second")
                 (func (export "main")
                   i32.const 0 i32.const 5 call $print_string
                   i32.const 8 i32.const 6 call $print_string))"#,
        ),
    );
    let (harness, sink) = harness();

    let result = harness
        .load_and_run(&source, "main", &[], &ImportsSpec::print_string())
        .await;
    assert_eq!(result, RunResult::Success { results: vec![] });
    assert_eq!(sink.lines(), vec!["first", "second"]);
}

#[tokio::test]
async fn repeated_import_in_spec_still_links() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(&dir, "hello.wasm", &wasm(HELLO));
    let (harness, sink) = harness();
    let mut imports = ImportsSpec::print_string();
    imports.functions.push(imports.functions[0]);

    let result = harness.load_and_run(&source, "main", &[], &imports).await;
    assert!(result.is_success(), "{result}");
    assert_eq!(sink.lines(), vec!["hello"]);
}

#[tokio::test]
async fn streamed_and_read_results_match() {
    let bytes = wasm(MERGED);
    let dir = tempfile::TempDir::new().unwrap();
    let file = write_module(&dir, "merged.wasm", &bytes);
    let url = serve("200 OK", bytes).await;
    let (harness, _) = harness();

    for (entry, args) in [
        ("add", vec![Value::I32(4)]),
        ("add_inc", vec![Value::I32(4), Value::I32(2)]),
        ("add", vec![]),
        ("missing", vec![]),
    ] {
        let from_file = harness
            .load_and_run(&file, entry, &args, &ImportsSpec::none())
            .await;
        let from_url = harness
            .load_and_run(&url, entry, &args, &ImportsSpec::none())
            .await;
        assert_eq!(from_file, from_url, "{entry} differs between sources");
    }
}

#[tokio::test]
async fn sync_and_async_paths_match() {
    let bytes = wasm(MERGED);
    let dir = tempfile::TempDir::new().unwrap();
    let file = write_module(&dir, "merged.wasm", &bytes);
    let (harness, _) = harness();

    let async_result = harness
        .load_and_run(&file, "add", &[Value::I32(41)], &ImportsSpec::none())
        .await;
    let sync_result = harness.run_bytes(&bytes, "add", &[Value::I32(41)], &ImportsSpec::none());
    assert_eq!(async_result, sync_result);
    assert_eq!(sync_result.value(), Some(Value::I32(42)));
}

#[tokio::test]
async fn missing_import_fails_at_instantiation() {
    let source = serve("200 OK", wasm(HELLO)).await;
    let (harness, sink) = harness();

    let result = harness
        .load_and_run(&source, "main", &[], &ImportsSpec::none())
        .await;
    match result {
        RunResult::Failure { stage, cause } => {
            assert_eq!(stage, Stage::Instantiate);
            assert!(cause.contains("print_string"), "{cause}");
        }
        other => panic!("expected Failure, got: {other}"),
    }
    assert!(sink.lines().is_empty());
}

#[tokio::test]
async fn repeated_runs_get_fresh_instances() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(&dir, "counter.wasm", &wasm(COUNTER));
    let (harness, sink) = harness();

    for _ in 0..2 {
        let result = harness
            .load_and_run(&source, "main", &[], &ImportsSpec::print_string())
            .await;
        // '0' + 1 == '1' every time: memory starts from the data segment.
        assert_eq!(result.value(), Some(Value::I32(i32::from(b'1'))));
    }
    assert_eq!(sink.lines(), vec!["1", "1"]);
}

#[tokio::test]
async fn guest_trap_is_execution_failure() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(
        &dir,
        "trap.wasm",
        &wasm(
            r#"(module
                 (func (export "boom") unreachable)
                 (func (export "div") (param i32) (result i32)
                   i32.const 1 local.get 0 i32.div_s)
                 (func $rec (export "recurse") call $rec))"#,
        ),
    );
    let (harness, _) = harness();

    let boom = harness
        .load_and_run(&source, "boom", &[], &ImportsSpec::none())
        .await;
    match &boom {
        RunResult::Failure { stage, cause } => {
            assert_eq!(*stage, Stage::Execute);
            assert!(cause.contains("unreachable"), "{cause}");
        }
        other => panic!("expected Failure, got: {other}"),
    }

    let div = harness
        .load_and_run(&source, "div", &[Value::I32(0)], &ImportsSpec::none())
        .await;
    assert_eq!(div.stage(), Some(Stage::Execute));

    let recurse = harness
        .load_and_run(&source, "recurse", &[], &ImportsSpec::none())
        .await;
    assert_eq!(recurse.stage(), Some(Stage::Execute));

    // The harness is still usable after guest faults.
    let ok = harness
        .load_and_run(&source, "div", &[Value::I32(1)], &ImportsSpec::none())
        .await;
    assert_eq!(ok.value(), Some(Value::I32(1)));
}

#[tokio::test]
async fn start_function_trap_is_instantiation_failure() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(
        &dir,
        "start.wasm",
        &wasm(
            r#"(module
                 (func $init unreachable)
                 (start $init)
                 (func (export "main")))"#,
        ),
    );
    let (harness, _) = harness();

    let result = harness
        .load_and_run(&source, "main", &[], &ImportsSpec::none())
        .await;
    assert_eq!(result.stage(), Some(Stage::Instantiate));
}

#[tokio::test]
async fn http_error_is_load_failure() {
    let source = serve("404 Not Found", b"not here".to_vec()).await;
    let (harness, _) = harness();

    let result = harness
        .load_and_run(&source, "main", &[], &ImportsSpec::none())
        .await;
    assert_eq!(result.stage(), Some(Stage::Load));
}

#[tokio::test]
async fn oversized_body_is_load_failure() {
    let source = serve("200 OK", wasm(MERGED)).await;
    let config = HarnessConfig {
        use_proxy: false,
        max_fetch_bytes: 8,
        ..Default::default()
    };
    let harness = WasmHarness::new(&config).unwrap();

    let result = harness
        .load_and_run(&source, "add", &[Value::I32(4)], &ImportsSpec::none())
        .await;
    assert_eq!(result.stage(), Some(Stage::Load));
}

#[tokio::test]
async fn streamed_garbage_is_compile_failure() {
    let source = serve("200 OK", b"this is not a wasm module at all".to_vec()).await;
    let (harness, _) = harness();

    let result = harness
        .load_and_run(&source, "main", &[], &ImportsSpec::none())
        .await;
    assert_eq!(result.stage(), Some(Stage::Compile));
}

#[tokio::test]
async fn streamed_truncated_module_is_compile_failure() {
    let mut bytes = wasm(MERGED);
    bytes.truncate(bytes.len() - 4);
    let source = serve("200 OK", bytes).await;
    let (harness, _) = harness();

    let result = harness
        .load_and_run(&source, "add", &[Value::I32(4)], &ImportsSpec::none())
        .await;
    assert_eq!(result.stage(), Some(Stage::Compile));
}

#[tokio::test]
async fn missing_file_is_load_failure() {
    let (harness, _) = harness();
    let result = harness
        .load_and_run(
            &ModuleSource::parse("/nonexistent/merged.wasm"),
            "add",
            &[Value::I32(4)],
            &ImportsSpec::none(),
        )
        .await;
    assert_eq!(result.stage(), Some(Stage::Load));
}

#[tokio::test]
async fn argument_type_mismatch_is_execution_failure() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_module(&dir, "merged.wasm", &wasm(MERGED));
    let (harness, _) = harness();

    let result = harness
        .load_and_run(&source, "add", &[Value::F64(1.5)], &ImportsSpec::none())
        .await;
    assert_eq!(result.stage(), Some(Stage::Execute));
}

#[tokio::test]
async fn builtin_scenario_runs_against_local_files() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("merged.wasm"), wasm(MERGED)).unwrap();
    let (harness, _) = harness();

    let scenario = HarnessConfig::default().scenario("add_inc").unwrap();
    let source = ModuleSource::Path(dir.path().join(&scenario.source));
    let result = harness
        .load_and_run(
            &source,
            &scenario.entry,
            &scenario.values().unwrap(),
            &scenario.imports,
        )
        .await;
    assert_eq!(result.value(), Some(Value::I32(6)));
}
