use chainlog_sync::{
    Channel, ErrorMessage, LocalChannel, LogCursor, ReplicationChannel, ReplicationMessage,
    ReplicationPeer, SyncError, SyncState,
};
use chainlog_types::PeerId;
use pretty_assertions::assert_eq;

fn ping(reason: &str) -> ReplicationMessage {
    ErrorMessage::internal(reason).into()
}

#[tokio::test]
async fn local_pair_carries_both_directions() {
    let (a, b) = LocalChannel::pair();

    a.send(ping("to b")).await.unwrap();
    b.send(ping("to a")).await.unwrap();

    assert_eq!(b.receive().await.unwrap(), ping("to b"));
    assert_eq!(a.receive().await.unwrap(), ping("to a"));
    assert!(a.is_open() && b.is_open());
}

#[tokio::test]
async fn messages_arrive_in_order() {
    let (a, b) = LocalChannel::pair();
    for i in 0..10 {
        a.send(ping(&i.to_string())).await.unwrap();
    }
    for i in 0..10 {
        assert_eq!(b.receive().await.unwrap(), ping(&i.to_string()));
    }
}

#[tokio::test]
async fn closing_drains_then_ends_the_peer() {
    let (a, b) = LocalChannel::pair();
    a.send(ping("last")).await.unwrap();
    a.close().await;

    assert!(!a.is_open());
    assert!(matches!(a.send(ping("late")).await, Err(SyncError::ChannelClosed)));
    assert!(matches!(a.receive().await, Err(SyncError::ChannelClosed)));

    assert_eq!(b.receive().await.unwrap(), ping("last"));
    assert!(matches!(b.receive().await, Err(SyncError::ChannelClosed)));
    assert!(!b.is_open());
}

#[tokio::test]
async fn dropped_peer_fails_sends() {
    let (a, b) = LocalChannel::pair();
    drop(b);
    assert!(matches!(a.send(ping("void")).await, Err(SyncError::ChannelClosed)));
    assert!(!a.is_open());
}

#[tokio::test]
async fn channel_enum_delegates_to_local() {
    let (a, b) = Channel::local_pair();
    assert!(matches!(a, Channel::Local(_)));

    a.send(ping("hi")).await.unwrap();
    assert_eq!(b.receive().await.unwrap(), ping("hi"));

    b.close().await;
    assert!(!b.is_open());
    assert!(matches!(a.receive().await, Err(SyncError::ChannelClosed)));

    let (c, _d) = LocalChannel::pair();
    let wrapped: Channel = c.into();
    assert!(wrapped.is_open());
}

#[test]
fn new_peer_is_idle_with_zeroed_cursors() {
    let id = PeerId::new();
    let peer = ReplicationPeer::new(id, "somewhere");
    assert_eq!(peer.peer_id, id);
    assert_eq!(peer.address, "somewhere");
    assert_eq!(peer.sync_state, SyncState::Idle);
    assert_eq!(peer.cursor("notes"), LogCursor::default());
    assert_eq!(peer.remote_length("notes"), 0);
    assert_eq!(peer.verified_up_to("notes"), 0);
}

#[test]
fn cursor_is_caught_up_at_remote_length() {
    let behind = LogCursor {
        remote_length: 5,
        verified_up_to: 3,
    };
    assert!(!behind.is_caught_up());
    assert!(
        LogCursor {
            remote_length: 5,
            verified_up_to: 5
        }
        .is_caught_up()
    );
    assert!(LogCursor::default().is_caught_up());
}

#[test]
fn peer_record_serializes() {
    let peer = ReplicationPeer::new(PeerId::new(), "addr");
    let json = serde_json::to_string(&peer).unwrap();
    let back: ReplicationPeer = serde_json::from_str(&json).unwrap();
    assert_eq!(back, peer);
}
