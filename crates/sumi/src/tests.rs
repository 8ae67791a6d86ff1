use protocol::{BlendMode, BrushShape, Color, DrawCommand, LayerId, PathPoint, Rect};

use super::*;

const WIDTH: u32 = 32;
const HEIGHT: u32 = 32;

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn software_handle(width: u32, height: u32) -> RendererHandle {
    init_test_tracing();
    let config = EngineConfig {
        backend_preference: BackendPreference::software_only(),
        ..EngineConfig::with_surface_size(width, height)
    };
    let handle = RendererHandle::new(config);
    handle
        .initialize()
        .expect("software backend always initializes");
    handle
}

fn add_layer(handle: &RendererHandle, id: &str, index: usize) {
    handle
        .submit_and_wait(vec![DrawCommand::AddLayer {
            layer_id: LayerId::new(id),
            index,
        }])
        .expect("add layer");
}

fn red_path(layer: &str) -> DrawCommand {
    DrawCommand::DrawPath {
        layer_id: LayerId::new(layer),
        points: vec![PathPoint::new(0.0, 0.0, 1.0), PathPoint::new(10.0, 0.0, 1.0)],
        color: Color::from_hex("#FF0000").expect("parse red"),
        width: 2.0,
        shape: BrushShape::Round,
    }
}

#[test]
fn draw_then_remove_scenario_matches_expected_state_and_pixels() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "L1", 0);
    let diff = handle
        .submit_and_wait(vec![red_path("L1")])
        .expect("draw path");
    assert!(!diff.rects.is_empty());
    assert_eq!(diff.frame_revision, handle.frame_revision());

    let state = handle.get_state().expect("query state");
    assert_eq!(state.layers.len(), 1);
    assert_eq!(state.layers[0].id, LayerId::new("L1"));
    assert_eq!(state.layers[0].index, 0);

    let pixel = handle
        .read_frame_rect(Rect::new(5, 0, 1, 1))
        .expect("read painted pixel");
    assert_eq!(pixel[0], 255, "pixel (5, 0) is red");
    assert_eq!(pixel[3], 255);

    handle
        .submit_and_wait(vec![DrawCommand::RemoveLayer {
            layer_id: LayerId::new("L1"),
        }])
        .expect("remove layer");
    let state = handle.get_state().expect("query state");
    assert!(state.layers.is_empty());

    let frame = handle
        .read_frame_rect(Rect::new(0, 0, WIDTH, HEIGHT))
        .expect("read full frame");
    assert!(
        frame.iter().all(|&byte| byte == 0),
        "recomposition is fully transparent"
    );
    handle.shutdown();
}

#[test]
fn multiply_layer_over_white_darkens_by_the_exact_formula() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "background", 0);
    add_layer(&handle, "paint", 1);

    let white = vec![255u8; (WIDTH * HEIGHT * 4) as usize];
    let mut red_block = Vec::with_capacity(4 * 4 * 4);
    for _ in 0..(4 * 4) {
        red_block.extend_from_slice(&[255, 0, 0, 255]);
    }
    handle
        .submit_and_wait(vec![
            DrawCommand::UpdateRasterArea {
                layer_id: LayerId::new("background"),
                rect: Rect::new(0, 0, WIDTH, HEIGHT),
                pixels: white,
            },
            DrawCommand::UpdateRasterArea {
                layer_id: LayerId::new("paint"),
                rect: Rect::new(8, 8, 4, 4),
                pixels: red_block,
            },
            DrawCommand::UpdateLayerProperties {
                layer_id: LayerId::new("paint"),
                opacity: 0.5,
                blend_mode: BlendMode::Multiply,
                visible: true,
                locked: false,
            },
        ])
        .expect("set up multiply scene");

    let pixel = handle
        .read_frame_rect(Rect::new(9, 9, 1, 1))
        .expect("read blended pixel");
    // multiply(red, white) = red; out = red * 0.5 + white * 0.5.
    assert_eq!(&pixel[..], &[255, 128, 128, 255]);
    handle.shutdown();
}

#[test]
fn batch_with_unknown_layer_leaves_state_untouched() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "L1", 0);

    let error = handle
        .submit_and_wait(vec![
            red_path("L1"),
            DrawCommand::RemoveLayer {
                layer_id: LayerId::new("ghost"),
            },
        ])
        .expect_err("batch with unknown layer must fail");
    assert_eq!(
        error,
        EngineError::UnknownLayer {
            layer_id: LayerId::new("ghost")
        }
    );

    let frame = handle
        .read_frame_rect(Rect::new(0, 0, WIDTH, HEIGHT))
        .expect("read frame");
    assert!(
        frame.iter().all(|&byte| byte == 0),
        "the rejected batch painted nothing"
    );
    let state = handle.get_state().expect("query state");
    assert_eq!(state.layers.len(), 1, "layer set unchanged");
    handle.shutdown();
}

#[test]
fn responses_awaited_out_of_order_carry_their_own_diffs() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "L1", 0);

    let first_rect = Rect::new(1, 1, 2, 2);
    let second_rect = Rect::new(20, 20, 3, 3);
    let first = handle
        .submit(vec![DrawCommand::UpdateRasterArea {
            layer_id: LayerId::new("L1"),
            rect: first_rect,
            pixels: vec![255; (2 * 2 * 4) as usize],
        }])
        .expect("issue first");
    let second = handle
        .submit(vec![DrawCommand::UpdateRasterArea {
            layer_id: LayerId::new("L1"),
            rect: second_rect,
            pixels: vec![255; (3 * 3 * 4) as usize],
        }])
        .expect("issue second");

    // Await in reverse order; each completion resolves with its own diff.
    let second_outcome = second.wait().expect("second response");
    let first_outcome = first.wait().expect("first response");
    let EngineOutcome::Committed(second_diff) = second_outcome else {
        panic!("expected committed diff");
    };
    let EngineOutcome::Committed(first_diff) = first_outcome else {
        panic!("expected committed diff");
    };
    assert_eq!(first_diff.rects.as_slice(), &[first_rect]);
    assert_eq!(second_diff.rects.as_slice(), &[second_rect]);
    assert!(first_diff.frame_revision < second_diff.frame_revision);
    handle.shutdown();
}

#[test]
fn stroke_session_end_to_end_leaves_a_mark_for_a_tap() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "ink", 0);
    handle.set_active_layer(Some(LayerId::new("ink")));
    handle.set_current_color(Color::from_hex("#0000FF").expect("parse blue"));
    handle.set_brush_size(4.0);

    let session_id = handle
        .begin_stroke(RawInputPoint::new(16.0, 16.0))
        .expect("begin stroke");
    let diff = match handle
        .end_stroke(session_id)
        .expect("end stroke")
        .wait()
        .expect("committed")
    {
        EngineOutcome::Committed(diff) => diff,
        other => panic!("expected committed diff, got {other:?}"),
    };
    assert!(!diff.rects.is_empty(), "a tap always leaves a mark");

    let pixel = handle
        .read_frame_rect(Rect::new(16, 16, 1, 1))
        .expect("read tap pixel");
    assert_eq!(pixel[2], 255, "tap center is blue");
    handle.shutdown();
}

#[test]
fn cancelled_stroke_leaves_layer_state_unchanged() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "ink", 0);
    handle.set_active_layer(Some(LayerId::new("ink")));

    let session_id = handle
        .begin_stroke(RawInputPoint::new(10.0, 10.0))
        .expect("begin stroke");
    handle
        .add_stroke_point(session_id, RawInputPoint::new(20.0, 10.0))
        .expect("add point");
    handle.cancel_stroke(session_id).expect("cancel stroke");

    let frame = handle
        .read_frame_rect(Rect::new(0, 0, WIDTH, HEIGHT))
        .expect("read frame");
    assert!(frame.iter().all(|&byte| byte == 0));
    handle.shutdown();
}

#[test]
fn stroke_preview_does_not_touch_the_committed_frame() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "ink", 0);
    handle.set_active_layer(Some(LayerId::new("ink")));

    let session_id = handle
        .begin_stroke(RawInputPoint::new(4.0, 4.0))
        .expect("begin stroke");
    let preview = handle
        .stroke_preview(session_id)
        .expect("preview")
        .expect("begin dab previewed");
    assert!(matches!(preview, DrawCommand::DrawPath { .. }));

    let frame = handle
        .read_frame_rect(Rect::new(0, 0, WIDTH, HEIGHT))
        .expect("read frame");
    assert!(frame.iter().all(|&byte| byte == 0), "preview is caller-side");
    handle.cancel_stroke(session_id).expect("cancel stroke");
    handle.shutdown();
}

#[test]
fn drawing_before_initialization_is_rejected_not_dropped() {
    init_test_tracing();
    let config = EngineConfig {
        backend_preference: BackendPreference::software_only(),
        ..EngineConfig::with_surface_size(WIDTH, HEIGHT)
    };
    let mut handle = RendererHandle::new(config);
    let error = handle
        .submit_and_wait(vec![red_path("L1")])
        .expect_err("uninitialized surface must reject drawing");
    assert_eq!(error, EngineError::NotInitialized);
    handle.shutdown();
}

#[test]
fn failed_selection_puts_the_surface_in_a_terminal_state() {
    init_test_tracing();
    let config = EngineConfig {
        backend_preference: BackendPreference { order: Vec::new() },
        ..EngineConfig::with_surface_size(WIDTH, HEIGHT)
    };
    let mut handle = RendererHandle::new(config);
    assert_eq!(
        handle.initialize().expect_err("no candidates"),
        EngineError::BackendUnavailable
    );
    let error = handle
        .submit_and_wait(vec![red_path("L1")])
        .expect_err("terminal surface rejects drawing");
    assert_eq!(error, EngineError::BackendUnavailable);
    handle.shutdown();
}

#[test]
fn shutdown_rejects_subsequent_requests() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    handle.shutdown();
    let error = handle
        .submit(vec![red_path("L1")])
        .err()
        .expect("torn-down surface refuses requests");
    assert_eq!(error, EngineError::TransportFailure);
}

#[test]
fn resize_reallocates_the_shared_region_and_keeps_drawing_working() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "L1", 0);
    handle.resize(64, 48).expect("resize");
    assert_eq!(handle.surface_size(), (64, 48));

    let state = handle.get_state().expect("query state");
    assert_eq!(state.layers.len(), 1, "layers survive a resize");

    handle
        .submit_and_wait(vec![DrawCommand::UpdateRasterArea {
            layer_id: LayerId::new("L1"),
            rect: Rect::new(50, 40, 1, 1),
            pixels: vec![1, 2, 3, 255],
        }])
        .expect("draw beyond the old bounds");
    let pixel = handle
        .read_frame_rect(Rect::new(50, 40, 1, 1))
        .expect("read resized pixel");
    assert_eq!(&pixel[..], &[1, 2, 3, 255]);
    handle.shutdown();
}

#[test]
fn get_state_merges_interactive_tool_state() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    handle.set_active_layer(Some(LayerId::new("paint")));
    handle.set_brush_size(12.0);
    handle.set_current_color(Color::WHITE);

    let state = handle.get_state().expect("query state");
    assert_eq!(state.active_layer_id, Some(LayerId::new("paint")));
    assert_eq!(state.current_brush_size, 12.0);
    assert_eq!(state.current_color, Color::WHITE);
    handle.shutdown();
}

#[test]
fn default_preference_initializes_via_fallback_when_needed() {
    init_test_tracing();
    let config = EngineConfig::with_surface_size(WIDTH, HEIGHT);
    let mut handle = RendererHandle::new(config);
    // Accelerated may or may not be available in the test environment; the
    // ordered fallback must land on some working backend either way.
    let backend_kind = handle.initialize().expect("fallback selection succeeds");
    assert!(matches!(
        backend_kind,
        BackendKind::Accelerated | BackendKind::Software
    ));
    handle.shutdown();
}

#[test]
fn selection_overlay_ships_dirty_rects_and_clears() {
    let mut handle = software_handle(WIDTH, HEIGHT);
    add_layer(&handle, "L1", 0);

    let diff = handle
        .submit_and_wait(vec![DrawCommand::ShowSelection {
            rect: Rect::new(4, 4, 10, 10),
        }])
        .expect("show selection");
    assert_eq!(diff.rects.as_slice(), &[Rect::new(4, 4, 10, 10)]);

    let corner = handle
        .read_frame_rect(Rect::new(4, 4, 1, 1))
        .expect("read outline corner");
    assert_eq!(corner[3], 255, "outline is visible");

    let diff = handle
        .submit_and_wait(vec![DrawCommand::ClearSelection])
        .expect("clear selection");
    assert_eq!(diff.rects.as_slice(), &[Rect::new(4, 4, 10, 10)]);
    let corner = handle
        .read_frame_rect(Rect::new(4, 4, 1, 1))
        .expect("read cleared corner");
    assert_eq!(corner, vec![0, 0, 0, 0], "outline removed");
    handle.shutdown();
}
