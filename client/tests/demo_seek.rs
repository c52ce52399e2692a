use std::io::Cursor;

use client::{ClientConfig, ClientSession, DemoPlayer, FrameSink, PlaybackState};
use demo_sim::{generate, SimConfig};

fn recording(config: &SimConfig) -> Cursor<Vec<u8>> {
    Cursor::new(generate(config).unwrap().bytes)
}

fn player(sim: &SimConfig, config: ClientConfig) -> DemoPlayer<Cursor<Vec<u8>>> {
    DemoPlayer::open(recording(sim), config).unwrap()
}

fn default_sim() -> SimConfig {
    SimConfig {
        snapshots: 400,
        ..SimConfig::default()
    }
}

#[test]
fn stats_match_generator() {
    let sim = default_sim();
    let summary = generate(&sim).unwrap().summary;
    let player = player(&sim, ClientConfig::default());
    let stats = player.stats();
    assert_eq!(stats.first_server_time, summary.first_server_time);
    assert_eq!(stats.last_server_time, summary.last_server_time);
    assert_eq!(stats.snapshots, u64::from(summary.full_snapshots + summary.delta_snapshots));
    assert_eq!(stats.messages, u64::from(summary.frames));
}

#[test]
fn seek_is_idempotent() {
    let mut player = player(&default_sim(), ClientConfig::default());
    for target in [15_000, 12_000, 12_000, 29_990, 10_100, 50_000] {
        player.seek(target).unwrap();
        let state = player.session().capture();
        let position = player.messages_read();

        let again = player.seek(target).unwrap();
        assert_eq!(again.messages_replayed, 0);
        assert_eq!(player.session().capture(), state, "target {target}");
        assert_eq!(player.messages_read(), position);
    }
}

#[test]
fn rewind_reproduces_checkpoint() {
    let mut player = player(&default_sim(), ClientConfig::default());
    player.seek(25_000).unwrap();

    let (_, checkpoint) = player
        .checkpoints()
        .iter()
        .rev()
        .find(|(_, cp)| cp.server_time() < 20_000)
        .map(|(key, cp)| (key, cp.clone()))
        .unwrap();
    let target = checkpoint.server_time();

    player.seek(28_000).unwrap();
    let report = player.rewind(target).unwrap();

    assert!(report.restored_from.is_some_and(|t| t <= target - 1_000));
    assert_eq!(player.session().server_time(), target);
    assert_eq!(player.session().state().snapshots, checkpoint.state.snapshots);
    assert_eq!(player.session().clock(), &checkpoint.state.clock);
    assert_eq!(player.session().realtime(), checkpoint.state.realtime);
}

#[test]
fn rewind_before_first_checkpoint_margin_uses_oldest() {
    let mut player = player(&default_sim(), ClientConfig::default());
    player.seek(20_000).unwrap();
    let oldest = player.checkpoints().oldest().unwrap().1.server_time();

    let report = player.seek(oldest + 10).unwrap();
    assert_eq!(report.restored_from, Some(oldest));
    assert_eq!(player.session().server_time(), oldest + 10);
}

#[test]
fn checkpoints_evict_oldest_first() {
    let sim = SimConfig {
        snapshots: 25_000,
        entities: 2,
        command_every: 0,
        ..SimConfig::default()
    };
    let config = ClientConfig {
        rewind_interval: 1_000,
        max_rewind_backups: 20,
        ..ClientConfig::default()
    };
    let mut player = player(&sim, config);
    player.seek_from_end(0).unwrap();

    let checkpoints = player.checkpoints();
    assert_eq!(checkpoints.len(), 20);
    let (oldest, _) = checkpoints.oldest().unwrap();
    assert!(oldest >= 5_000, "oldest checkpoint at {oldest}");
}

#[test]
fn seeking_works_with_dropped_messages() {
    let sim = SimConfig {
        snapshots: 300,
        drop_every: 9,
        full_every: 50,
        ..SimConfig::default()
    };
    let mut player = player(&sim, ClientConfig::default());
    let forward = player.seek(22_000).unwrap();
    assert_eq!(forward.server_time, 22_000);
    let back = player.seek(12_345).unwrap();
    assert_eq!(back.server_time, 12_345);
    assert!(player.session().current_snapshot().1 >= 12_345);
}

#[derive(Default)]
struct CountingSink {
    frames: usize,
    commands: Vec<i32>,
}

impl FrameSink for CountingSink {
    fn server_command(&mut self, sequence: i32, _text: &str) {
        self.commands.push(sequence);
    }

    fn draw_frame(&mut self, session: &ClientSession) {
        assert!(session.has_valid_snapshot());
        self.frames += 1;
    }
}

#[test]
fn playback_delivers_commands_in_order() {
    let sim = SimConfig {
        snapshots: 120,
        command_every: 5,
        ..SimConfig::default()
    };
    let mut player = player(&sim, ClientConfig::default());
    let mut sink = CountingSink::default();
    let mut frames = 0;
    while player.run_frame(16, &mut sink).unwrap().is_some() {
        frames += 1;
        assert!(frames < 10_000);
    }
    assert_eq!(player.state(), PlaybackState::Finished);
    assert_eq!(sink.commands, (1..=24).collect::<Vec<_>>());
}

#[test]
fn seek_next_steps_through_snapshots() {
    let mut player = player(&default_sim(), ClientConfig::default());
    player.seek(15_000).unwrap();
    for expected in [15_050, 15_100, 15_150] {
        let report = player.seek_next().unwrap().unwrap();
        assert_eq!(report.server_time, expected);
    }
    let report = player.seek_prev().unwrap().unwrap();
    assert_eq!(report.server_time, 15_100);

    player.seek_from_end(0).unwrap();
    assert_eq!(player.seek_next().unwrap(), None);
}
