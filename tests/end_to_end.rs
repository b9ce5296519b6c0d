use pretty_assertions::assert_eq;
use rgb_matrix_driver::{BufferingMode, Color, MatrixDriver, PanelConfig, SlotRole};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn frame_pixels(port: &mut rgb_matrix_driver::ScanPort) -> Vec<(u32, u32, Color)> {
    port.begin_frame().pixels().collect()
}

#[test]
fn double_buffered_2x2_frame_publishes_without_leaking() {
    let (mut driver, mut port) =
        MatrixDriver::setup(PanelConfig::new(2, 2, BufferingMode::Double)).unwrap();

    // A previous frame, so the buffer we get back after rotation is stale.
    let stale = Color::new(7, 7, 7);
    driver.fill(stale);
    driver.rotate_framebuffer();

    driver.set_pixel_at(0, 0, Color::new(255, 0, 0));
    driver.set_pixel_at(1, 0, Color::new(0, 255, 0));
    driver.set_pixel_at(0, 1, Color::new(0, 0, 255));
    driver.set_pixel_at(1, 1, Color::new(10, 20, 30));
    driver.rotate_framebuffer();

    assert_eq!(
        frame_pixels(&mut port),
        vec![
            (0, 0, Color::new(255, 0, 0)),
            (1, 0, Color::new(0, 255, 0)),
            (0, 1, Color::new(0, 0, 255)),
            (1, 1, Color::new(10, 20, 30)),
        ]
    );
    assert!(driver.write_buffer().pixels().all(|(_, _, c)| c == stale));

    let roles: Vec<SlotRole> = driver.roles().roles().collect();
    assert_eq!(roles.iter().filter(|r| **r == SlotRole::ScanActive).count(), 1);
    assert_eq!(roles.iter().filter(|r| **r == SlotRole::Writing).count(), 1);
}

#[test]
fn single_buffered_writes_are_visible_immediately() {
    let (mut driver, mut port) =
        MatrixDriver::setup(PanelConfig::new(2, 2, BufferingMode::Single)).unwrap();
    let before = driver.roles();

    driver.set_pixel_at(1, 1, Color::new(1, 2, 3));
    for _ in 0..3 {
        driver.rotate_framebuffer();
    }

    assert_eq!(driver.roles(), before);
    assert_eq!(port.begin_frame().get(1, 1), Some(Color::new(1, 2, 3)));
}

#[test]
fn out_of_range_writes_never_reach_the_panel() {
    let (mut driver, mut port) =
        MatrixDriver::setup(PanelConfig::new(2, 2, BufferingMode::Triple)).unwrap();
    driver.set_pixel_at(2, 2, Color::new(255, 255, 255));
    driver.set_pixel_at(5, 0, Color::new(255, 255, 255));
    driver.rotate_framebuffer();

    assert!(port.begin_frame().pixels().all(|(_, _, c)| c == Color::BLACK));
    assert_eq!(driver.stats().ignored_writes, 2);
}

/// The writer paints every frame in one uniform color and rotates as fast
/// as it can; the scanner checks every pass it makes. With triple
/// buffering no pass may ever mix two frames.
#[test]
fn triple_buffered_scan_never_sees_a_torn_frame() {
    let (mut driver, mut port) =
        MatrixDriver::setup(PanelConfig::new(16, 8, BufferingMode::Triple)).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let scanner_done = done.clone();
    let scanner = thread::spawn(move || {
        let mut passes = 0u64;
        let mut last_seen = 0u32;
        while !scanner_done.load(Ordering::SeqCst) {
            let frame = port.begin_frame();
            let first = frame.get(0, 0).unwrap();
            for (column, row, color) in frame.pixels() {
                assert_eq!(color, first, "torn frame at ({column}, {row})");
            }
            let id = first.to_word();
            assert!(id >= last_seen, "frames went backwards: {id} after {last_seen}");
            last_seen = id;
            passes += 1;
        }
        passes
    });

    for id in 1..=5000u32 {
        driver.fill(Color::from_word(id));
        driver.rotate_framebuffer();
        let roles: Vec<SlotRole> = driver.roles().roles().collect();
        assert_eq!(roles.iter().filter(|r| **r == SlotRole::ScanActive).count(), 1);
    }

    done.store(true, Ordering::SeqCst);
    let passes = scanner.join().unwrap();
    assert!(passes > 0);

    let stats = driver.stats();
    assert_eq!(stats.pool.rotations, 5000);
    assert!(stats.pool.frames_dropped < 5000);
}
