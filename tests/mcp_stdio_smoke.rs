use lanmap::model::{Compression, HostInfo, PayloadData, RawEntry};
use lanmap::payload::encode_payload;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

fn tool_text(reply: &Value) -> (bool, String) {
    let result = reply.get("result").expect("tools/call result");
    let is_error = result.get("isError").and_then(|x| x.as_bool()).expect("isError flag");
    let text = result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|x| x.get("text"))
        .and_then(|x| x.as_str())
        .expect("tool text");
    (is_error, text.to_string())
}

#[test]
fn mcp_stdio_smoke() {
    // `cargo test` sets this for integration tests.
    let bin = env!("CARGO_BIN_EXE_lanmap");
    let tmp = tempfile::TempDir::new().unwrap();
    let store_path = tmp.path().join("store.json");

    let mut child = Command::new(bin)
        .arg("--store")
        .arg(&store_path)
        .arg("mcp")
        .current_dir(tmp.path())
        .env_remove("LANMAP_STORE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lanmap mcp");

    let mut stdin = child.stdin.take().expect("child stdin");
    let mut lines = BufReader::new(child.stdout.take().expect("child stdout")).lines();

    // One request per line; the server replies in order.
    let mut request = |msg: Value| -> Value {
        writeln!(stdin, "{msg}").unwrap();
        stdin.flush().unwrap();
        let line = lines.next().expect("reply line").expect("read stdout line");
        serde_json::from_str(&line).expect("stdout is json")
    };

    let init = request(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "protocolVersion": "2024-11-05" }
    }));
    assert_eq!(init["id"], 1);
    assert!(init["result"].get("capabilities").is_some());
    assert_eq!(init["result"]["serverInfo"]["name"], "lanmap");

    let list = request(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }));
    let names: std::collections::HashSet<&str> = list["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
        .collect();
    for required in ["lanmap_import", "lanmap_tree", "lanmap_context_pack", "lanmap_hosts"] {
        assert!(names.contains(required), "missing tool: {required}");
    }

    let data = PayloadData::new(
        HostInfo {
            label: "backup-nas".into(),
            address: "192.168.1.40".into(),
        },
        "/volume1",
        vec![
            RawEntry::dir("homes"),
            RawEntry::text_file("homes/admin/.bash_history", "sudo reboot\n"),
            RawEntry::binary_file("homes/admin/photo.jpg", 40_960),
        ],
    );
    let payload = encode_payload(&data, Compression::Deflate).unwrap();

    let import = request(json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": { "name": "lanmap_import", "arguments": { "payload": payload } }
    }));
    let (is_error, text) = tool_text(&import);
    assert!(!is_error, "import failed: {text}");
    let result: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(result["importedCount"], 3);
    let host_id = result["hostId"].as_str().unwrap().to_string();

    let tree = request(json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": { "name": "lanmap_tree", "arguments": { "hostId": host_id } }
    }));
    let (is_error, text) = tool_text(&tree);
    assert!(!is_error);
    let tree: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(tree[0]["name"], "homes");
    // `homes/admin` was never listed, so it is a placeholder.
    assert_eq!(tree[0]["children"][0]["id"], "placeholder:homes/admin");

    let pack = request(json!({
        "jsonrpc": "2.0",
        "id": 5,
        "method": "tools/call",
        "params": { "name": "lanmap_context_pack", "arguments": { "hostId": host_id, "chunkPreset": "small" } }
    }));
    let (is_error, text) = tool_text(&pack);
    assert!(!is_error);
    let pack: Value = serde_json::from_str(&text).unwrap();
    let content = pack["parts"][0]["content"].as_str().unwrap();
    assert!(content.contains("Host: backup-nas (192.168.1.40)"));
    assert!(content.contains("### homes/admin/.bash_history"));
    assert_eq!(pack["summary"]["hostId"], host_id.as_str());

    let missing = request(json!({
        "jsonrpc": "2.0",
        "id": 6,
        "method": "tools/call",
        "params": { "name": "lanmap_tree", "arguments": { "hostId": "nope" } }
    }));
    let (is_error, text) = tool_text(&missing);
    assert!(is_error);
    assert!(text.contains("request.not_found"));

    // Close stdin so the server loop can exit.
    drop(request);
    drop(stdin);
    let status = child.wait().expect("wait child");
    assert!(status.success(), "mcp process should exit cleanly");

    assert!(store_path.exists(), "import should persist the store");
}
