#![no_main]

use std::io::Cursor;

use client::{ClientConfig, DemoPlayer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&seed, demo)) = data.split_first() else {
        return;
    };
    let config = ClientConfig {
        max_rewind_backups: 4,
        rewind_interval: 3,
        ..ClientConfig::for_testing()
    };
    let Ok(mut player) = DemoPlayer::open(Cursor::new(demo), config) else {
        return;
    };

    let stats = *player.stats();
    let span = i64::from(stats.duration()).max(1);
    let targets = [
        stats.last_server_time,
        stats.first_server_time + i32::try_from(i64::from(seed) * span / 255).unwrap_or(0),
        stats.first_server_time,
    ];
    for target in targets {
        if player.seek(target).is_err() {
            return;
        }
        assert!(player.session().server_time() >= stats.first_server_time);
        assert!(player.session().server_time() <= stats.last_server_time);
    }
    for _ in 0..32 {
        if !matches!(player.run_frame(16, &mut ()), Ok(Some(_))) {
            break;
        }
    }
});
