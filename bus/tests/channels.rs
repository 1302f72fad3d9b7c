//! Channel-based pipeline: delivery, closure, and reconfiguration

use bus::{alts_process, per_input_process, AltsNode, AsyncFlowGraph, Link, Node, PerInputNode, PortId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Echoes every event from any input to port `out`.
struct Echo;

impl Node<i64> for Echo {
    fn process(&mut self, _input: &str, event: i64) -> Vec<(PortId, i64)> {
        vec![("out".to_string(), event)]
    }
}

/// Collects received events into a shared vector.
struct Sink(Arc<Mutex<Vec<i64>>>);

impl Node<i64> for Sink {
    fn process(&mut self, _input: &str, event: i64) -> Vec<(PortId, i64)> {
        self.0.lock().unwrap().push(event);
        Vec::new()
    }
}

fn sink() -> (Sink, Arc<Mutex<Vec<i64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    (Sink(seen.clone()), seen)
}

fn ports(names: &[&str]) -> Vec<PortId> {
    names.iter().map(|n| (*n).to_string()).collect()
}

async fn wait_for_len(seen: &Arc<Mutex<Vec<i64>>>, n: usize) {
    timeout(Duration::from_secs(5), async {
        loop {
            if seen.lock().unwrap().len() >= n {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("events did not arrive in time");
}

#[tokio::test]
async fn closing_inputs_closes_outputs() {
    let process = alts_process(Echo, &ports(&["in"]), &ports(&["out"]), 8);
    let tx = process.input("in").unwrap();
    let (inputs, mut outputs, tasks) = process.into_parts();
    let mut out = outputs.remove("out").unwrap();

    for n in 1..=3 {
        tx.send(n).await.unwrap();
    }
    drop(tx);
    drop(inputs);

    // in-flight events drain, then the output closes
    assert_eq!(out.recv().await, Some(1));
    assert_eq!(out.recv().await, Some(2));
    assert_eq!(out.recv().await, Some(3));
    assert_eq!(out.recv().await, None);

    for task in tasks {
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn per_input_fifo_is_preserved() {
    let process = per_input_process(Echo, &ports(&["a", "b"]), &ports(&["out"]), 8);
    let tx = process.input("a").unwrap();
    let (inputs, mut outputs, _tasks) = process.into_parts();
    let mut out = outputs.remove("out").unwrap();

    for n in 0..50 {
        tx.send(n).await.unwrap();
    }
    drop(tx);
    drop(inputs);

    let mut got = Vec::new();
    while let Some(n) = out.recv().await {
        got.push(n);
    }
    assert_eq!(got, (0..50).collect::<Vec<i64>>());
}

#[tokio::test]
async fn linked_nodes_deliver_end_to_end() {
    let graph = AsyncFlowGraph::new(16);
    let (sink, seen) = sink();
    graph
        .add_node("a", AltsNode::new(Echo, ports(&["in"]), ports(&["out"])))
        .await
        .unwrap();
    graph
        .add_node("b", AltsNode::new(sink, ports(&["in"]), ports(&[])))
        .await
        .unwrap();
    graph
        .add_link(Link::new("a", "out", "in", "b"))
        .await
        .unwrap();

    for n in 1..=5 {
        graph.ingest("a", "in", n).await.unwrap();
    }
    wait_for_len(&seen, 5).await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);

    graph.shutdown().await;
}

#[tokio::test]
async fn fan_out_reaches_every_tap() {
    let graph = AsyncFlowGraph::new(16);
    let (sink_b, seen_b) = sink();
    let (sink_c, seen_c) = sink();
    graph
        .add_node("a", AltsNode::new(Echo, ports(&["in"]), ports(&["out"])))
        .await
        .unwrap();
    graph
        .add_node("b", PerInputNode::new(sink_b, ports(&["in"]), ports(&[])))
        .await
        .unwrap();
    graph
        .add_node("c", PerInputNode::new(sink_c, ports(&["in"]), ports(&[])))
        .await
        .unwrap();
    graph
        .add_link(Link::new("a", "out", "in", "b"))
        .await
        .unwrap();
    graph
        .add_link(Link::new("a", "out", "in", "c"))
        .await
        .unwrap();

    graph.ingest("a", "in", 42).await.unwrap();
    wait_for_len(&seen_b, 1).await;
    wait_for_len(&seen_c, 1).await;

    graph.shutdown().await;
}

#[tokio::test]
async fn remove_link_stops_delivery() {
    let graph = AsyncFlowGraph::new(16);
    let (sink, seen) = sink();
    graph
        .add_node("a", AltsNode::new(Echo, ports(&["in"]), ports(&["out"])))
        .await
        .unwrap();
    graph
        .add_node("b", AltsNode::new(sink, ports(&["in"]), ports(&[])))
        .await
        .unwrap();
    let link = Link::new("a", "out", "in", "b");
    graph.add_link(link.clone()).await.unwrap();

    graph.ingest("a", "in", 1).await.unwrap();
    wait_for_len(&seen, 1).await;

    graph.remove_link(&link).await.unwrap();
    assert!(graph.links().await.is_empty());

    // further events no longer reach b
    graph.ingest("a", "in", 2).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock().unwrap(), vec![1]);

    graph.shutdown().await;
}

#[tokio::test]
async fn remove_node_waits_for_workers_and_tolerates_ingest() {
    let graph = AsyncFlowGraph::new(16);
    let (sink, seen) = sink();
    graph
        .add_node("a", AltsNode::new(Echo, ports(&["in"]), ports(&["out"])))
        .await
        .unwrap();
    graph
        .add_node("b", AltsNode::new(sink, ports(&["in"]), ports(&[])))
        .await
        .unwrap();
    graph
        .add_link(Link::new("a", "out", "in", "b"))
        .await
        .unwrap();

    graph.ingest("a", "in", 1).await.unwrap();
    wait_for_len(&seen, 1).await;

    graph.remove_node("a").await.unwrap();
    assert_eq!(graph.nodes().await, vec!["b".to_string()]);
    assert!(graph.links().await.is_empty());

    // the node is gone; ingesting into it is an error, not a hang
    assert!(graph.ingest("a", "in", 2).await.is_err());

    graph.shutdown().await;
}

#[tokio::test]
async fn self_loops_shut_down_cleanly() {
    let graph = AsyncFlowGraph::new(4);
    graph
        .add_node("a", AltsNode::new(Echo, ports(&["in"]), ports(&["out"])))
        .await
        .unwrap();
    graph
        .add_link(Link::new("a", "out", "in", "a"))
        .await
        .unwrap();

    graph.ingest("a", "in", 1).await.unwrap();
    sleep(Duration::from_millis(20)).await;

    // the event is circulating; removal must still terminate
    timeout(Duration::from_secs(5), graph.remove_node("a"))
        .await
        .expect("self-loop removal hung")
        .unwrap();
}

#[tokio::test]
async fn structural_errors() {
    let graph: AsyncFlowGraph<i64> = AsyncFlowGraph::new(4);
    graph
        .add_node("a", AltsNode::new(Echo, ports(&["in"]), ports(&["out"])))
        .await
        .unwrap();
    assert!(graph
        .add_node("a", AltsNode::new(Echo, ports(&["in"]), ports(&["out"])))
        .await
        .is_err());
    assert!(graph
        .add_link(Link::new("a", "out", "in", "ghost"))
        .await
        .is_err());
    assert!(graph
        .add_link(Link::new("a", "nope", "in", "a"))
        .await
        .is_err());
    assert!(graph.remove_node("ghost").await.is_err());

    graph.shutdown().await;
}
