//! Session channels
//!
//! Each accepted session channel is owned by one [`ChannelSession`]
//! controller. The transport feeds it through a [`ChannelPorts`] pair of
//! unbounded queues so that delivering a request or an input chunk never
//! waits on the controller.
//!
//! A request that wants a reply travels with a one-shot slot for the
//! controller's decision. The transport awaits it through [`PendingReply`]
//! and answers the peer before it reads the next message, which keeps
//! replies in request order.

mod controller;
mod relay;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use rsh_protocol::ChannelRequest;

pub use controller::ChannelSession;

/// A queued request and, if the peer wants one, the slot for its reply
#[derive(Debug)]
pub struct IncomingRequest {
    pub request: ChannelRequest,
    reply: Option<oneshot::Sender<bool>>,
}

impl IncomingRequest {
    /// Wrap `request`, creating a reply slot when it wants a reply
    pub fn new(request: ChannelRequest) -> (Self, PendingReply) {
        let (reply, pending) = if request.want_reply {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        (Self { request, reply }, PendingReply(pending))
    }

    /// Deliver the decision. One-way requests ignore it.
    pub fn reply(&mut self, accepted: bool) {
        if let Some(reply) = self.reply.take() {
            // The transport may have gone away
            let _ = reply.send(accepted);
        }
    }
}

/// Transport-side wait for a request's decision
#[derive(Debug)]
pub struct PendingReply(Option<oneshot::Receiver<bool>>);

impl PendingReply {
    /// The decision, or `None` for a one-way request. A request the
    /// controller dropped unanswered counts as rejected.
    pub async fn decision(self) -> Option<bool> {
        match self.0 {
            Some(rx) => Some(rx.await.unwrap_or(false)),
            None => None,
        }
    }
}

/// Transport-side ends of a session channel's queues
#[derive(Debug)]
pub struct ChannelPorts {
    requests: mpsc::UnboundedSender<IncomingRequest>,
    input: Option<mpsc::UnboundedSender<Bytes>>,
}

/// Controller-side ends of a session channel's queues
#[derive(Debug)]
pub struct ChannelInbox {
    /// Requests in arrival order; ends when the peer closes the channel
    pub requests: mpsc::UnboundedReceiver<IncomingRequest>,
    /// Data chunks from the peer; ends on the peer's EOF
    pub input: mpsc::UnboundedReceiver<Bytes>,
}

/// Create the queue pair for a new channel
pub fn channel() -> (ChannelPorts, ChannelInbox) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (input_tx, input_rx) = mpsc::unbounded_channel();

    (
        ChannelPorts {
            requests: request_tx,
            input: Some(input_tx),
        },
        ChannelInbox {
            requests: request_rx,
            input: input_rx,
        },
    )
}

impl ChannelPorts {
    /// Queue a request. Returns `None` if the controller is gone.
    pub fn send_request(&self, request: ChannelRequest) -> Option<PendingReply> {
        let (incoming, pending) = IncomingRequest::new(request);
        self.requests.send(incoming).ok().map(|_| pending)
    }

    /// Queue a chunk of peer data. Returns `false` if it cannot be delivered.
    pub fn send_input(&self, data: Bytes) -> bool {
        match &self.input {
            Some(input) => input.send(data).is_ok(),
            None => false,
        }
    }

    /// Signal the peer's EOF; later input is dropped
    pub fn close_input(&mut self) {
        self.input = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsh_protocol::RequestKind;

    #[test]
    fn test_ports_deliver_in_order() {
        let (ports, mut inbox) = channel();
        assert!(ports
            .send_request(ChannelRequest::new(RequestKind::Shell, Bytes::new()))
            .is_some());
        assert!(ports.send_input(Bytes::from_static(b"ls\n")));

        assert_eq!(inbox.requests.try_recv().unwrap().request.kind, RequestKind::Shell);
        assert_eq!(inbox.input.try_recv().unwrap(), Bytes::from_static(b"ls\n"));
    }

    #[test]
    fn test_close_input_ends_stream() {
        let (mut ports, mut inbox) = channel();
        ports.close_input();
        assert!(!ports.send_input(Bytes::from_static(b"late")));
        assert!(matches!(
            inbox.input.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        // Requests still flow after EOF
        assert!(ports
            .send_request(ChannelRequest::notification(
                RequestKind::WindowChange,
                Bytes::new()
            ))
            .is_some());
    }

    #[tokio::test]
    async fn test_reply_reaches_transport() {
        let (ports, mut inbox) = channel();
        let pending = ports
            .send_request(ChannelRequest::new(RequestKind::Shell, Bytes::new()))
            .unwrap();

        inbox.requests.try_recv().unwrap().reply(true);
        assert_eq!(pending.decision().await, Some(true));
    }

    #[tokio::test]
    async fn test_unanswered_request_counts_as_rejected() {
        let (ports, mut inbox) = channel();
        let pending = ports
            .send_request(ChannelRequest::new(RequestKind::Exec, Bytes::new()))
            .unwrap();

        drop(inbox.requests.try_recv().unwrap());
        assert_eq!(pending.decision().await, Some(false));
    }

    #[tokio::test]
    async fn test_one_way_request_has_no_decision() {
        let (ports, mut inbox) = channel();
        let pending = ports
            .send_request(ChannelRequest::notification(RequestKind::WindowChange, Bytes::new()))
            .unwrap();

        inbox.requests.try_recv().unwrap().reply(false);
        assert_eq!(pending.decision().await, None);
    }

    #[test]
    fn test_send_to_finished_controller() {
        let (ports, inbox) = channel();
        drop(inbox);
        assert!(ports
            .send_request(ChannelRequest::new(RequestKind::Shell, Bytes::new()))
            .is_none());
    }

    #[test]
    fn test_dropping_ports_ends_requests() {
        let (ports, mut inbox) = channel();
        drop(ports);
        assert!(matches!(
            inbox.requests.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
