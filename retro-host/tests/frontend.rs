mod common;

use common::{Step, observe, push_steps};
use retro_host::HostConfig;
use retro_host::frontend::{Frontend, StopReason, saves};
use std::path::PathBuf;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    content: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("game.rom");
        std::fs::write(&content, [0x10, 0x20, 0x30]).unwrap();
        Self { dir, content }
    }

    fn save_dir(&self) -> PathBuf {
        self.dir.path().join("saves")
    }

    fn config(&self) -> HostConfig {
        let mut config = HostConfig::default();
        config.paths.save_dir = Some(self.save_dir());
        config.frontend.unthrottled = true;
        config
    }

    fn frontend(&self, setup: impl FnOnce(&mut common::Mock)) -> Frontend {
        let (host, _sinks) = common::configured_host_with(self.config(), setup);
        Frontend::new(host).unwrap()
    }
}

#[test]
fn start_reads_content_and_runs_to_frame_limit() {
    let fixture = Fixture::new();
    let mut frontend = fixture.frontend(|_| {});

    let timing = frontend.start(Some(fixture.content.as_path())).unwrap();
    assert_eq!(timing.fps, 60.0);
    assert_eq!(frontend.timing(), Some(timing));
    let loaded = observe(|mock| mock.loaded.clone()).unwrap();
    assert_eq!(loaded.data, Some(vec![0x10, 0x20, 0x30]));

    assert_eq!(frontend.run(Some(5)).unwrap(), StopReason::FrameLimit);
    assert_eq!(frontend.host().frame_count(), 5);
    assert_eq!(common::count("run"), 5);
}

#[test]
fn fullpath_core_gets_only_the_path() {
    let fixture = Fixture::new();
    let mut frontend = fixture.frontend(|mock| mock.need_fullpath = true);
    frontend.start(Some(fixture.content.as_path())).unwrap();

    let loaded = observe(|mock| mock.loaded.clone()).unwrap();
    assert_eq!(loaded.data, None);
    assert_eq!(
        loaded.path.map(PathBuf::from),
        Some(fixture.content.clone())
    );
}

#[test]
fn shutdown_request_stops_the_loop() {
    let fixture = Fixture::new();
    let mut frontend = fixture.frontend(|_| {});
    frontend.start(Some(fixture.content.as_path())).unwrap();
    push_steps([
        Step::default(),
        Step {
            shutdown: true,
            ..Step::default()
        },
    ]);

    assert_eq!(frontend.run(None).unwrap(), StopReason::ShutdownRequested);
    assert_eq!(frontend.host().frame_count(), 2);
}

#[test]
fn paused_frontend_does_not_run() {
    let fixture = Fixture::new();
    let mut frontend = fixture.frontend(|_| {});
    frontend.start(Some(fixture.content.as_path())).unwrap();
    frontend.tick(None).unwrap();
    frontend.pause().unwrap();

    assert!(frontend.is_paused());
    assert_eq!(frontend.tick(None).unwrap(), 0);
    assert_eq!(frontend.run(Some(10)).unwrap(), StopReason::Paused);
    assert_eq!(frontend.host().frame_count(), 1);

    frontend.resume().unwrap();
    assert_eq!(frontend.run(Some(3)).unwrap(), StopReason::FrameLimit);
}

#[test]
fn fast_forward_runs_several_frames_per_tick() {
    let fixture = Fixture::new();
    let mut frontend = fixture.frontend(|_| {});
    frontend.start(Some(fixture.content.as_path())).unwrap();

    frontend.set_fast_forward(true);
    assert_eq!(frontend.tick(None).unwrap(), 3);
    assert_eq!(frontend.tick(Some(2)).unwrap(), 2);
    frontend.set_fast_forward(false);
    assert_eq!(frontend.tick(None).unwrap(), 1);
    assert_eq!(frontend.host().frame_count(), 6);
}

#[test]
fn messages_expire_after_their_frame_count() {
    let fixture = Fixture::new();
    let mut frontend = fixture.frontend(|_| {});
    frontend.start(Some(fixture.content.as_path())).unwrap();
    push_steps([Step {
        message: Some((c"saved", 2)),
        ..Step::default()
    }]);

    frontend.tick(None).unwrap();
    assert_eq!(frontend.message().map(|m| m.text.as_str()), Some("saved"));
    frontend.tick(None).unwrap();
    assert!(frontend.message().is_some());
    frontend.tick(None).unwrap();
    assert!(frontend.message().is_none());
}

#[test]
fn save_ram_is_restored_and_written_back() {
    let fixture = Fixture::new();
    std::fs::create_dir_all(fixture.save_dir()).unwrap();
    std::fs::write(fixture.save_dir().join("game.srm"), [9, 9, 9, 9]).unwrap();

    let mut frontend = fixture.frontend(|mock| mock.save_ram = vec![0; 8]);
    frontend.start(Some(fixture.content.as_path())).unwrap();
    assert_eq!(
        observe(|mock| mock.save_ram.clone()),
        [9, 9, 9, 9, 0, 0, 0, 0]
    );

    common::configure(|mock| mock.save_ram[7] = 1);
    frontend.stop().unwrap();

    let written = std::fs::read(fixture.save_dir().join("game.sav")).unwrap();
    assert_eq!(written, [9, 9, 9, 9, 0, 0, 0, 1]);
    assert_eq!(common::count("deinit"), 1);
}

#[test]
fn oversized_save_is_skipped() {
    let fixture = Fixture::new();
    std::fs::create_dir_all(fixture.save_dir()).unwrap();
    std::fs::write(fixture.save_dir().join("game.sav"), [5; 32]).unwrap();

    let mut frontend = fixture.frontend(|mock| mock.save_ram = vec![0; 8]);
    frontend.start(Some(fixture.content.as_path())).unwrap();
    assert_eq!(observe(|mock| mock.save_ram.clone()), [0; 8]);
    assert_eq!(
        saves::existing_save(&fixture.save_dir(), &fixture.content),
        Some(fixture.save_dir().join("game.sav"))
    );
}

#[test]
fn start_without_content_needs_core_support() {
    let fixture = Fixture::new();
    let mut frontend = fixture.frontend(|_| {});
    assert!(frontend.start(None).is_err());

    let mut frontend = fixture.frontend(|mock| mock.support_no_game = true);
    frontend.start(None).unwrap();
    assert_eq!(frontend.run(Some(1)).unwrap(), StopReason::FrameLimit);
}
