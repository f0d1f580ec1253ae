//! Integration tests for Reposerve

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn reposerve(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("reposerve");
        cmd.env("REPOSERVE_CONFIG", config_dir.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        reposerve(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("versioned file server"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        reposerve(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("reposerve"));
    }

    #[test]
    fn status_runs() {
        // git or zip may be missing, but the report itself must not fail
        let dir = TempDir::new().unwrap();
        reposerve(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Tools:"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        reposerve(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        reposerve(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[server]"))
            .stdout(predicate::str::contains(".bootfilelist"));
    }

    #[test]
    fn config_init_then_show_reads_file() {
        let dir = TempDir::new().unwrap();
        reposerve(&dir).args(["config", "init"]).assert().success();
        std::fs::write(
            dir.path().join("config.toml"),
            "[server]\nport = 9123\n",
        )
        .unwrap();
        reposerve(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("9123"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[server\n").unwrap();
        reposerve(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn serve_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        reposerve(&dir)
            .args(["serve", "--backend", "memory", "-d"])
            .arg(dir.path().join("absent"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("File not found"));
    }
}

mod http_tests {
    use async_trait::async_trait;
    use reposerve::cache::Archiver;
    use reposerve::config::Config;
    use reposerve::server::{self, AppState};
    use reposerve::vcs::MemoryVcs;
    use reposerve::ReposerveResult;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use ureq::http::Request;

    /// Writes the member list instead of a zip and counts invocations
    #[derive(Default)]
    struct CountingArchiver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Archiver for CountingArchiver {
        async fn create(&self, _cwd: &Path, output: &Path, members: &[String]) -> ReposerveResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::fs::write(output, format!("build {}\n{}", n, members.join("\n")))
                .await
                .unwrap();
            Ok(())
        }
    }

    struct TestServer {
        dir: TempDir,
        base: String,
        state: AppState,
        vcs: Arc<MemoryVcs>,
        archiver: Arc<CountingArchiver>,
        handle: JoinHandle<ReposerveResult<()>>,
    }

    impl TestServer {
        async fn start() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("repoA")).unwrap();

            let mut config = Config::default();
            config.server.root_dir = dir.path().to_path_buf();
            config.server.auto_commit = true;

            let vcs = Arc::new(MemoryVcs::new());
            let archiver = Arc::new(CountingArchiver::default());
            let state = AppState::new(&config, vcs.clone(), archiver.clone());

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let handle = tokio::spawn(server::serve(listener, state.clone()));

            Self {
                dir,
                base,
                state,
                vcs,
                archiver,
                handle,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }
    }

    fn agent() -> ureq::Agent {
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .build()
            .into()
    }

    /// Run blocking HTTP calls off the runtime's worker threads
    async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    fn header(response: &ureq::http::Response<ureq::Body>, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_get_and_conflict() {
        let server = TestServer::start().await;
        let url = server.url("/repoA/notes.txt");

        let (v1, v2, conflict, body, cors) = blocking(move || {
            let agent = agent();
            let put = agent.put(&url).send("hello").unwrap();
            assert_eq!(put.status(), 200);
            let first_put_version = header(&put, "fileversion").unwrap();

            let mut get = agent.get(&url).call().unwrap();
            assert_eq!(get.status(), 200);
            let v1 = header(&get, "fileversion").unwrap();
            assert_eq!(v1, first_put_version);
            let cors = header(&get, "access-control-allow-origin");
            let body = get.body_mut().read_to_string().unwrap();

            let put = agent
                .put(&url)
                .header("lastversion", v1.as_str())
                .send("hello again")
                .unwrap();
            assert_eq!(put.status(), 200);
            let v2 = header(&put, "fileversion").unwrap();

            let stale = agent
                .put(&url)
                .header("lastversion", v1.as_str())
                .send("lost edit")
                .unwrap();
            assert_eq!(stale.status(), 409);
            let conflict = header(&stale, "conflictversion");
            (v1, v2, conflict, body, cors)
        })
        .await;

        assert_eq!(body, "hello");
        assert!(!v1.is_empty());
        assert_ne!(v1, v2);
        assert_eq!(conflict, Some(v2));
        assert_eq!(cors.as_deref(), Some("*"));
        assert_eq!(
            std::fs::read_to_string(server.dir.path().join("repoA/notes.txt")).unwrap(),
            "hello again"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bundle_is_reused_until_a_member_changes() {
        let server = TestServer::start().await;
        let manifest = server.url("/repoA/.bootfilelist");
        let boot = server.url("/repoA/boot.js");
        let bundle = server.url("/repoA/.bundle.zip");

        let (first, second) = blocking({
            let (manifest, boot, bundle) = (manifest.clone(), boot.clone(), bundle.clone());
            move || {
                let agent = agent();
                assert_eq!(agent.put(&manifest).send("boot.js\n").unwrap().status(), 200);
                assert_eq!(agent.put(&boot).send("let a = 1").unwrap().status(), 200);
                let first = agent.get(&bundle).call().unwrap().body_mut().read_to_vec().unwrap();
                let second = agent.get(&bundle).call().unwrap().body_mut().read_to_vec().unwrap();
                (first, second)
            }
        })
        .await;

        assert_eq!(first, second);
        assert_eq!(server.archiver.calls.load(Ordering::SeqCst), 1);
        let listing = String::from_utf8(first).unwrap();
        assert!(listing.contains("boot.js"));
        assert!(listing.contains(".options/boot.js"));

        let rebuilt = blocking(move || {
            let agent = agent();
            assert_eq!(agent.put(&boot).send("let a = 2").unwrap().status(), 200);
            agent.get(&bundle).call().unwrap().body_mut().read_to_string().unwrap()
        })
        .await;

        assert!(rebuilt.starts_with("build 2"));
        assert_eq!(server.archiver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn directory_operations() {
        let server = TestServer::start().await;
        let newdir = server.url("/repoA/newdir");
        let file = server.url("/repoA/newdir/a.md");
        let repo = server.url("/repoA/");

        let (mkcol, again, options, delete, delete_again, listing) = blocking(move || {
            let agent = agent();
            let mkcol = Request::builder()
                .method("MKCOL")
                .uri(&newdir)
                .body(())
                .unwrap();
            let first = agent.run(mkcol).unwrap().status();
            let mkcol = Request::builder()
                .method("MKCOL")
                .uri(&newdir)
                .body(())
                .unwrap();
            let again = agent.run(mkcol).unwrap().status();

            agent.put(&file).send("# notes").unwrap();
            let options = Request::builder()
                .method("OPTIONS")
                .uri(&repo)
                .header("filelist", "true")
                .body(())
                .unwrap();
            let listing = agent
                .run(options)
                .unwrap()
                .body_mut()
                .read_to_string()
                .unwrap();

            let missing = Request::builder()
                .method("OPTIONS")
                .uri(format!("{}gone.txt", repo))
                .body(())
                .unwrap();
            let options = agent.run(missing).unwrap().status();

            let delete = agent.delete(&file).call().unwrap().status();
            let delete_again = agent.delete(&file).call().unwrap().status();
            (first, again, options, delete, delete_again, listing)
        })
        .await;

        assert_eq!(mkcol, 200);
        assert_eq!(again, 409);
        assert_eq!(options, 200);
        assert_eq!(delete, 200);
        assert_eq!(delete_again, 404);

        let json: serde_json::Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(json["type"], "filelist");
        let names: Vec<&str> = json["contents"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["name"].as_str())
            .collect();
        assert!(names.contains(&"./newdir/a.md"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn escaping_paths_are_forbidden() {
        let server = TestServer::start().await;
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("pwned.txt");
        let encoded = target.to_string_lossy().trim_start_matches('/').to_string();

        let reads: Vec<String> = ["/repoA/%2e%2e/secret", "/repoA//etc/passwd", "//etc/passwd", "/repoA/%2Fetc/passwd"]
            .iter()
            .map(|path| server.url(path))
            .collect();
        let writes = vec![
            server.url(&format!("/repoA//{}", encoded)),
            server.url(&format!("/repoA/%2F{}", encoded)),
        ];

        let (read_statuses, write_statuses) = blocking(move || {
            let agent = agent();
            let reads: Vec<u16> = reads
                .iter()
                .map(|url| agent.get(url).call().unwrap().status().as_u16())
                .collect();
            let writes: Vec<u16> = writes
                .iter()
                .map(|url| agent.put(url).send("owned").unwrap().status().as_u16())
                .collect();
            (reads, writes)
        })
        .await;

        assert!(read_statuses.iter().all(|s| *s == 403), "{read_statuses:?}");
        assert!(write_statuses.iter().all(|s| *s == 403), "{write_statuses:?}");
        assert!(!target.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repository_control_operations() {
        let server = TestServer::start().await;
        let base = server.base.clone();

        let (branches, no_message, commit, dry_run, clone) = blocking(move || {
            let agent = agent();
            let git = |operation: &str| {
                agent
                    .post(format!("{}/_git/{}", base, operation))
                    .header("gitrepository", "repoA")
            };
            let branches = git("branches")
                .send_empty()
                .unwrap()
                .body_mut()
                .read_to_string()
                .unwrap();
            let no_message = git("commit").send_empty().unwrap().status().as_u16();
            let commit = git("commit")
                .header("gitcommitmessage", "save all")
                .send_empty()
                .unwrap()
                .status()
                .as_u16();
            let dry_run = git("clone")
                .header("dryrun", "true")
                .header("gitrepositoryurl", "https://example.com/x.git")
                .send_empty()
                .unwrap()
                .body_mut()
                .read_to_string()
                .unwrap();
            let clone = agent
                .post(format!("{}/_git/clone", base))
                .header("gitrepository", "repoB")
                .header("gitrepositoryurl", "https://example.com/repoB.git")
                .send_empty()
                .unwrap()
                .status()
                .as_u16();
            (branches, no_message, commit, dry_run, clone)
        })
        .await;

        assert_eq!(branches, "* main\n");
        assert_eq!(no_message, 400);
        assert_eq!(commit, 200);
        assert_eq!(dry_run, "clone repoA");
        assert_eq!(clone, 200);
        assert!(server.dir.path().join("repoB").is_dir());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_is_gated_per_repository() {
        let server = TestServer::start().await;
        let url = server.url("/_git/sync");

        let guard = server.state.sync_gate().try_enter("repoA").unwrap();
        let busy = blocking({
            let url = url.clone();
            move || {
                agent()
                    .post(&url)
                    .header("gitrepository", "repoA")
                    .header("gitrepositorybranch", "main")
                    .send_empty()
                    .unwrap()
                    .body_mut()
                    .read_to_string()
                    .unwrap()
            }
        })
        .await;
        assert_eq!(busy, "Sync in progress: repoA");
        assert_eq!(server.vcs.sync_count(), 0);

        drop(guard);
        let status = blocking(move || {
            agent()
                .post(&url)
                .header("gitrepository", "repoA")
                .header("gitrepositorybranch", "main")
                .send_empty()
                .unwrap()
                .status()
        })
        .await;
        assert_eq!(status, 200);
        assert_eq!(server.vcs.sync_count(), 1);
        assert!(!server.state.sync_gate().is_held("repoA"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn temp_store_and_webhooks() {
        let server = TestServer::start().await;
        let tmp = server.url("/_tmp/drop.png");
        let missing = server.url("/_tmp/none");

        let (stored, absent) = blocking(move || {
            let agent = agent();
            agent.put(&tmp).send(&[0u8, 1, 2][..]).unwrap();
            let stored = agent.get(&tmp).call().unwrap().body_mut().read_to_vec().unwrap();
            let absent = agent.get(&missing).call().unwrap().status();
            (stored, absent)
        })
        .await;
        assert_eq!(stored, vec![0, 1, 2]);
        assert_eq!(absent, 404);

        let register = server.url("/_webhook/register");
        let listener = tokio::task::spawn_blocking(move || {
            agent()
                .get(&register)
                .header("repositoryname", "org/repoA")
                .call()
                .unwrap()
                .body_mut()
                .read_to_string()
                .unwrap()
        });
        for _ in 0..100 {
            if server.state.webhooks().waiting("org/repoA") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let signal = server.url("/_webhook/signal");
        let (ok, bad) = blocking(move || {
            let agent = agent();
            let ok = agent
                .post(&signal)
                .send(r#"{"repository":{"full_name":"org/repoA"}}"#)
                .unwrap()
                .status();
            let bad = agent.post(&signal).send("not json").unwrap().status();
            (ok, bad)
        })
        .await;
        assert_eq!(ok, 200);
        assert_eq!(bad, 400);

        let delivered: serde_json::Value =
            serde_json::from_str(&listener.await.unwrap()).unwrap();
        assert_eq!(delivered["repository"]["full_name"], "org/repoA");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn meta_exit_stops_server() {
        let server = TestServer::start().await;
        let url = server.url("/_meta/exit");
        let status = blocking(move || agent().get(&url).call().unwrap().status()).await;
        assert_eq!(status, 200);

        let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
