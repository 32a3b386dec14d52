//! On-chip mapping surface of the MMU adapter.

use nna_core::config::Config;
use pretty_assertions::assert_eq;

use crate::common::TestContext;

#[test]
fn onchip_maps_are_tracked_per_session() {
    let mut ctx = TestContext::new(2, Config::default());
    let session = ctx.add_session();

    let map = ctx
        .dev
        .map_to_onchip(session, 10, 0x1000_0000, &[0, 1, 2])
        .expect("map failed");
    assert_eq!(ctx.dev.session(session).unwrap().onchip_maps, vec![map]);

    ctx.dev
        .unmap_from_onchip(session, map)
        .expect("unmap failed");
    assert!(ctx.dev.session(session).unwrap().onchip_maps.is_empty());
}

#[test]
fn mapping_unknown_buffers_is_rejected() {
    let mut ctx = TestContext::new(2, Config::default());
    let session = ctx.add_session();
    assert!(ctx
        .dev
        .map_to_onchip(session, 0x999, 0x1000_0000, &[0])
        .is_err());
}
