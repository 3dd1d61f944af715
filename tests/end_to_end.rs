use std::{
    fs,
    net::{SocketAddr, TcpStream},
    path::{Path, PathBuf},
    process::Command,
    thread::sleep,
    time::Duration,
};

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};

#[tokio::test]
async fn quota_status_over_tls() {
    let exe = env!("CARGO_PKG_NAME");
    let dir = tempfile::tempdir().unwrap();
    let dir = dir.path();

    let thumbgate::conf::Conf {
        addr, port, tls, ..
    } = setup_conf(&dir);
    let tls = tls.unwrap();
    let cert = fs::read(&tls.cert_file).unwrap();
    let cert = reqwest::Certificate::from_pem(cert.trim_ascii()).unwrap();
    let client = reqwest::Client::builder()
        .add_root_certificate(cert)
        .build()
        .unwrap();
    let cmd = || {
        let mut cmd = Command::cargo_bin(exe).unwrap();
        cmd.arg("--dir").arg(dir);
        cmd
    };

    let output = cmd().args(["jwt", "alice", "60"]).output().unwrap();
    assert!(output.status.success());
    let token = String::from_utf8(output.stdout).unwrap();
    let token = token.trim();

    let sock_addr: SocketAddr = format!("{addr}:{port}").parse().unwrap();
    assert!(server_is_not_listening(&sock_addr));
    let mut server = cmd().arg("server").spawn().unwrap();
    assert!(server_is_listening(&sock_addr));

    let base = format!("https://{addr}:{port}");
    let health = client.get(format!("{base}/health")).send().await;
    let anonymous = client.get(format!("{base}/rate-limit")).send().await;
    let status = client
        .get(format!("{base}/rate-limit"))
        .bearer_auth(token)
        .send()
        .await;
    let status = match status {
        Ok(resp) => Ok((resp.status(), resp.json::<serde_json::Value>().await)),
        Err(e) => Err(e),
    };

    // XXX Stop the server BEFORE asserting, because if any assert fails
    //     we will not get a chance to clean-up.
    server.kill().unwrap();

    assert!(health.unwrap().status().is_success());
    assert_eq!(anonymous.unwrap().status(), reqwest::StatusCode::UNAUTHORIZED);
    let (status, body) = status.unwrap();
    assert!(status.is_success());
    let body = body.unwrap();
    assert_eq!(body["remaining"], 3);
    assert!(body["reset"].as_i64().unwrap() > 0);
}

fn setup_conf(workdir: &Path) -> thumbgate::conf::Conf {
    let (cert_file, key_file) = setup_cert(workdir);
    let conf = thumbgate::conf::Conf {
        log_level: tracing::Level::INFO,
        addr: "127.0.0.1".parse().unwrap(),
        port: 7000,
        daily_limit: 3,
        allowed_origins: vec![],
        jwt: thumbgate::conf::Jwt {
            secret: "fake-secret".to_string(),
            audience: "fake-audience".to_string(),
            issuer: "fake-issuer".to_string(),
        },
        upstream: thumbgate::conf::Upstream {
            base_url: "http://127.0.0.1:7001".to_string(),
            ..Default::default()
        },
        tls: Some(thumbgate::conf::Tls {
            cert_file: cert_file.clone(),
            key_file: key_file.clone(),
        }),
    };
    let conf_str = toml::to_string(&conf).unwrap();
    let conf_dir = workdir.join("conf");
    fs::create_dir_all(&conf_dir).unwrap();
    fs::write(conf_dir.join("conf.toml"), &conf_str).unwrap();
    conf
}

fn setup_cert(workdir: &Path) -> (PathBuf, PathBuf) {
    let cert_dir = workdir.join("cert");
    fs::create_dir_all(&cert_dir).unwrap();
    let cert_file = cert_dir.join("cert.pem");
    let key_file = cert_dir.join("key.pem");

    #[rustfmt::skip] // I want the args to stay paired.
    Command::new("openssl").args([
        "req", "-x509",
        "-newkey", "rsa:4096",
        "-days", "365",
        "-nodes",
        "-subj", "/CN=localhost",
        "-addext", "subjectAltName=DNS:localhost,IP:127.0.0.1",
    ])
    .arg("-keyout")
    .arg(&key_file)
    .arg("-out")
    .arg(&cert_file)
    .assert();
    (
        cert_file.canonicalize().unwrap(),
        key_file.canonicalize().unwrap(),
    )
}

fn server_is_not_listening(addr: &SocketAddr) -> bool {
    TcpStream::connect(addr).is_err()
}

fn server_is_listening(addr: &SocketAddr) -> bool {
    let interval = Duration::from_secs_f32(0.25);
    let attempts = 20;
    retry_until_true(|| TcpStream::connect(addr).is_ok(), interval, attempts)
}

fn retry_until_true<F: Fn() -> bool>(
    f: F,
    interval: Duration,
    mut attempts: usize,
) -> bool {
    while attempts > 0 {
        if f() {
            return true;
        } else {
            attempts -= 1;
            sleep(interval);
        }
    }
    false
}
