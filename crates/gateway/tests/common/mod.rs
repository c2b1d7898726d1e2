#![allow(dead_code)]

use anyhow::Context as _;
use std::io::BufRead as _;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Kills the spawned server when the test ends, pass or fail.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if let Ok(resp) = client.get(url).send().await
            && resp.status().is_success()
        {
            return Ok(());
        }
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub struct SpawnedGateway {
    pub child: Child,
    pub base: String,
}

fn parse_listen_addr(line: &str, marker: &str) -> Option<String> {
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    // Logs are JSON when not on a TTY; the address ends before the next quote or brace.
    let end = rest
        .find('"')
        .or_else(|| rest.find('}'))
        .unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

/// Outcome of a server process that was expected to fail at startup.
pub struct EarlyExit {
    pub success: bool,
    pub output: String,
}

fn forward_lines(child: &mut Child) -> anyhow::Result<mpsc::Receiver<String>> {
    let stdout = child.stdout.take().context("missing child stdout")?;
    let stderr = child.stderr.take().context("missing child stderr")?;

    let (tx, rx) = mpsc::channel::<String>();
    let tx_out = tx.clone();
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stdout);
        for line in reader.lines().map_while(Result::ok) {
            let _ = tx_out.send(line);
        }
    });
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            let _ = tx.send(line);
        }
    });
    Ok(rx)
}

pub fn wait_for_gateway_port(mut child: Child, timeout: Duration) -> anyhow::Result<SpawnedGateway> {
    let rx = forward_lines(&mut child)?;

    let start = Instant::now();
    let mut last_lines: Vec<String> = Vec::new();

    while start.elapsed() < timeout {
        if let Ok(Some(status)) = child.try_wait() {
            anyhow::bail!(
                "gateway process exited early: {status}; output:\n{}",
                last_lines.join("\n")
            );
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => {
                if last_lines.len() >= 50 {
                    last_lines.remove(0);
                }
                last_lines.push(line.clone());

                if let Some(addr) = parse_listen_addr(&line, "Starting API HTTP server on ") {
                    return Ok(SpawnedGateway {
                        child,
                        base: format!("http://{addr}"),
                    });
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    anyhow::bail!(
        "timed out waiting for gateway port; last output:\n{}",
        last_lines.join("\n")
    );
}

fn gateway_command(config_path: &std::path::Path) -> Command {
    let bin = env!("CARGO_BIN_EXE_dashproxy-gateway");
    let mut cmd = Command::new(bin);
    cmd.arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--config")
        .arg(config_path)
        .arg("--log-level")
        .arg("info")
        .env("DASHPROXY_SECRET_KEY", "dashproxy-test-secret-key")
        .env_remove("DASHPROXY_LOG_JSON")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

pub fn spawn_gateway(config_path: &std::path::Path) -> anyhow::Result<SpawnedGateway> {
    let child = gateway_command(config_path)
        .spawn()
        .context("spawn gateway")?;
    wait_for_gateway_port(child, Duration::from_secs(10))
}

/// Run a gateway that should refuse to start, and collect its output.
pub fn run_gateway_to_exit(
    config_path: &std::path::Path,
    timeout: Duration,
) -> anyhow::Result<EarlyExit> {
    let mut child = gateway_command(config_path)
        .spawn()
        .context("spawn gateway")?;
    let rx = forward_lines(&mut child)?;
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            // Let the reader threads drain.
            std::thread::sleep(Duration::from_millis(100));
            let output: Vec<String> = rx.try_iter().collect();
            return Ok(EarlyExit {
                success: status.success(),
                output: output.join("\n"),
            });
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            anyhow::bail!("gateway did not exit");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
