//! CLI tests for `codeloop init`, `codeloop run` setup errors, `codeloop infer` and `codeloop exec`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::process::Command;
use std::thread;

use codeloop::exit_codes;
use codeloop::io::config::{CONFIG_TEMPLATE, DEFAULT_CONFIG_PATH, parse_config};
use codeloop::io::prompt::HELPER_SYSTEM_PROMPT;

fn codeloop() -> Command {
    Command::new(env!("CARGO_BIN_EXE_codeloop"))
}

#[test]
fn init_writes_a_parseable_template_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join(DEFAULT_CONFIG_PATH);

    let status = codeloop()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("codeloop init");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let written = std::fs::read_to_string(&path).expect("config");
    assert_eq!(written, CONFIG_TEMPLATE);
    parse_config(&written).expect("template parses");

    std::fs::write(&path, "# edited\n").expect("edit");
    let status = codeloop()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("codeloop init again");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(std::fs::read_to_string(&path).expect("config"), "# edited\n");

    let status = codeloop()
        .current_dir(temp.path())
        .args(["init", "--force"])
        .status()
        .expect("codeloop init --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(std::fs::read_to_string(&path).expect("config"), CONFIG_TEMPLATE);
}

#[test]
fn run_without_config_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = codeloop()
        .current_dir(temp.path())
        .arg("run")
        .output()
        .expect("codeloop run");

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("codeloop init"), "stderr: {stderr}");
}

#[test]
fn run_rejects_zero_iterations() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join(DEFAULT_CONFIG_PATH), CONFIG_TEMPLATE).expect("config");

    let out = codeloop()
        .current_dir(temp.path())
        .args(["run", "--max-iterations", "0"])
        .output()
        .expect("codeloop run");

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("max_iterations"), "stderr: {stderr}");
}

#[cfg(unix)]
#[test]
fn exec_prints_the_rendered_result() {
    let out = codeloop()
        .args(["exec", "--runtime", "sh", "--timeout", "5", "echo hello from exec"])
        .output()
        .expect("codeloop exec");

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout, "*** Code execution output:\n\nhello from exec\n");
}

/// Serve one streamed chat completion answering `reply`; the handle yields the request body.
fn serve_one_chat(reply: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base_url = format!("http://{}", listener.local_addr().expect("addr"));
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().expect("content length");
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).expect("read body");

        let events = format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{reply}\"}}}}]}}\n\ndata: [DONE]\n\n"
        );
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{events}",
            events.len()
        )
        .expect("write response");
        String::from_utf8(body).expect("utf8 body")
    });
    (base_url, handle)
}

#[test]
fn infer_prints_the_model_answer() {
    let (base_url, server) = serve_one_chat("  The sky is blue.  ");
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("helper.toml");
    std::fs::write(
        &config,
        format!("[api]\nbase_url = \"{base_url}\"\n\n[run]\nobjective = \"unused\"\nmax_iterations = 1\n"),
    )
    .expect("config");

    let out = codeloop()
        .env_remove("OPENAI_API_KEY")
        .env_remove("HTTP_PROXY")
        .env_remove("http_proxy")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy")
        .args(["infer", "--config"])
        .arg(&config)
        .arg("Summarize: the sky looks blue today.")
        .output()
        .expect("codeloop infer");

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "The sky is blue.\n");

    let request: serde_json::Value =
        serde_json::from_str(&server.join().expect("server")).expect("json request");
    assert_eq!(request["stream"], true);
    assert_eq!(request["messages"][0]["role"], "system");
    assert_eq!(request["messages"][0]["content"], HELPER_SYSTEM_PROMPT);
    assert_eq!(
        request["messages"][1]["content"],
        "Summarize: the sky looks blue today."
    );
}

#[test]
fn infer_without_config_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = codeloop()
        .current_dir(temp.path())
        .args(["infer", "hello"])
        .output()
        .expect("codeloop infer");
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}
