//! Batch accumulation, commit, and zone-view reconciliation end to end.

mod common;

use std::net::IpAddr;
use std::time::Duration;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RData;
use hindsight_dns::batch::BatchState;

use common::*;

fn timed_config() -> hindsight_dns::config::AgentConfig {
    let mut config = eager_config(1000);
    config.batch_update_size = 10;
    config.batch_update_frequency = 30;
    config.batch_threshold = 0.5;
    config
}

#[tokio::test]
async fn sparse_batch_waits_for_threshold() {
    let client = MockUpdateClient::noerror();
    let agent = build_agent(timed_config(), client.clone());

    // Four fresh addresses land in the batch between t=0 and t=29.
    for i in 1..=4u8 {
        observe(
            &agent,
            &format!("10.0.0.{i}"),
            &[&format!("host{i}.example.")],
            i as f64,
        );
    }

    // Timer has run at t=30 but 4 < 10 * 0.5: the batch keeps
    // accumulating and nothing is written.
    agent.refresh_tick(30.0).await;
    assert!(client.requests().is_empty());
    let snapshot = agent.recent_refreshes(10);
    assert_eq!(
        snapshot.current.as_ref().map(|b| b.state),
        Some(BatchState::Accumulating)
    );

    // A fifth address meets the threshold; the next tick writes.
    observe(&agent, "10.0.0.5", &["host5.example."], 31.0);
    agent.refresh_tick(32.0).await;

    assert_eq!(client.requests().len(), 1);
    let snapshot = agent.recent_refreshes(10);
    assert!(snapshot.current.is_none());
    assert_eq!(snapshot.recent.len(), 1);
    let batch = &snapshot.recent[0];
    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.addresses.len(), 5);
    assert!(batch.succeeded());
    // Created with the first add at t=1, promoted at t=32.
    assert_eq!(batch.elapsed_accumulating(), Some(31.0));
}

#[tokio::test]
async fn successful_commit_advances_zone_view_to_best() {
    let client = MockUpdateClient::noerror();
    let agent = build_agent(eager_config(1000), client.clone());

    observe(&agent, "10.2.66.5", &["www.a.example.", "a.example."], 0.0);
    observe(&agent, "10.2.66.5", &["b.example."], 0.0);
    agent.refresh_tick(1.0).await;

    // The zone mirrors the best resolution as of commit time.
    let address: IpAddr = "10.2.66.5".parse().unwrap();
    let entry = agent.zone_entry(&address).expect("zone entry expected");
    assert_eq!(entry.ptr, "a.example.");
    let metadata = entry.metadata.expect("metadata expected");
    assert!(metadata.first <= 0.0);
    assert!(metadata.last <= 0.0);
    assert_eq!(metadata.update, 1.0);
    assert_eq!(agent.cross_check().discrepancies(), 0);
}

#[tokio::test]
async fn committed_transaction_carries_ptr_and_txt() {
    let client = MockUpdateClient::noerror();
    let agent = build_agent(eager_config(1000), client.clone());

    observe(&agent, "10.2.66.5", &["www.a.example.", "a.example."], 0.0);
    agent.refresh_tick(1.0).await;

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    // Zone section names the zone apex.
    assert_eq!(request.queries().len(), 1);
    assert_eq!(
        request.queries()[0]
            .name()
            .to_ascii()
            .to_lowercase()
            .trim_end_matches('.'),
        "rpz.example.com"
    );

    // Update section: wipe, then the PTR and TXT pair at the reverse owner.
    let updates = request.name_servers();
    assert_eq!(updates.len(), 3);
    let owner = "5.66.2.10.in-addr.arpa.rpz.example.com";
    for record in updates {
        assert_eq!(
            record.name().to_ascii().to_lowercase().trim_end_matches('.'),
            owner
        );
    }
    let ptr = updates
        .iter()
        .find_map(|r| match r.data() {
            RData::PTR(ptr) => Some(ptr.0.to_ascii().to_lowercase()),
            _ => None,
        })
        .expect("PTR record expected");
    assert_eq!(ptr.trim_end_matches('.'), "a.example");
    let txt = updates
        .iter()
        .find_map(|r| match r.data() {
            RData::TXT(txt) => Some(
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<String>(),
            ),
            _ => None,
        })
        .expect("TXT record expected");
    assert!(txt.contains("update=1.000"));
    assert!(txt.contains("score="));
}

#[tokio::test]
async fn refused_update_completes_with_rcode_and_leaves_views_diverged() {
    let client = MockUpdateClient::servfail();
    let agent = build_agent(eager_config(1000), client.clone());

    for i in 1..=3u8 {
        observe(
            &agent,
            &format!("10.0.0.{i}"),
            &[&format!("host{i}.example.")],
            i as f64,
        );
    }
    agent.refresh_tick(10.0).await;

    let snapshot = agent.recent_refreshes(10);
    assert_eq!(snapshot.recent.len(), 1);
    let batch = &snapshot.recent[0];
    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.rcode, Some(ResponseCode::ServFail));
    assert!(!batch.succeeded());

    // Zone view untouched, addresses not requeued, and the drift is
    // visible in the cross-check.
    for i in 1..=3u8 {
        let address: IpAddr = format!("10.0.0.{i}").parse().unwrap();
        assert!(agent.zone_entry(&address).is_none());
    }
    assert_eq!(agent.queue_depths().batch_pending, 0);
    assert_eq!(agent.cross_check().discrepancies(), 3);
}

#[tokio::test]
async fn transport_failure_completes_with_error() {
    let client = MockUpdateClient::failing("connection refused");
    let agent = build_agent(eager_config(1000), client.clone());

    observe(&agent, "10.0.0.1", &["a.example."], 0.0);
    agent.refresh_tick(1.0).await;

    let snapshot = agent.recent_refreshes(10);
    let batch = &snapshot.recent[0];
    assert_eq!(batch.state, BatchState::Complete);
    assert!(batch.rcode.is_none());
    assert!(batch
        .error
        .as_deref()
        .is_some_and(|e| e.contains("connection refused")));
    assert_eq!(agent.cross_check().discrepancies(), 1);
}

#[tokio::test]
async fn only_one_batch_writes_at_a_time() {
    let client = MockUpdateClient::gated(ResponseCode::NoError);
    let agent = build_agent(eager_config(1000), client.clone());

    observe(&agent, "10.0.0.1", &["a.example."], 0.0);
    let committing = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.refresh_tick(1.0).await })
    };

    // Wait for the commit to take the writer slot.
    for _ in 0..100 {
        if agent.queue_depths().batch_writing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(agent.queue_depths().batch_writing);

    // A second batch accumulates during the write but cannot be promoted.
    observe(&agent, "10.0.0.2", &["b.example."], 2.0);
    agent.refresh_tick(3.0).await;
    assert_eq!(client.requests().len(), 1);
    let snapshot = agent.recent_refreshes(10);
    assert_eq!(
        snapshot.current.as_ref().map(|b| b.state),
        Some(BatchState::Accumulating)
    );

    // Release the gate; the slot frees and the second batch can write.
    client.release();
    committing.await.unwrap();
    assert!(!agent.queue_depths().batch_writing);

    client.set_behavior(MockBehavior::Respond(ResponseCode::NoError));
    agent.refresh_tick(4.0).await;
    assert_eq!(client.requests().len(), 2);
}

#[tokio::test]
async fn failed_addresses_reenqueue_through_later_eviction() {
    let mut config = eager_config(1);
    config.batch_update_size = 8;
    let client = MockUpdateClient::servfail();
    let agent = build_agent(config, client.clone());

    observe(&agent, "10.0.0.1", &["x.example."], 0.0);
    agent.refresh_tick(1.0).await;
    assert_eq!(client.requests().len(), 1);
    assert_eq!(agent.queue_depths().batch_pending, 0);

    // The next overflow shears the same address again, which naturally
    // re-enqueues it for the zone.
    client.set_behavior(MockBehavior::Respond(ResponseCode::NoError));
    observe(&agent, "10.0.0.1", &["y.example."], 2.0);
    assert!(agent.queue_depths().batch_pending >= 1);
    agent.refresh_tick(3.0).await;

    let address: IpAddr = "10.0.0.1".parse().unwrap();
    assert!(agent.zone_entry(&address).is_some());
}
