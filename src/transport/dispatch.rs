//! Command dispatch registry: a visitor over every [`CommandBody`]
//! variant, used by the failover layer to replay the commands that
//! built up session/connection/producer/consumer state onto a freshly
//! reconnected transport. Any variant without an explicit visit method
//! falls through to `visit_other`, whose default is to do nothing.

use crate::command::{
    Command, CommandBody, ConnectionInfo, ConsumerInfo, ProducerInfo, RemoveInfo, RemovableId,
    SessionInfo, TransactionInfo, TransactionKind,
};

/// Default implementations ignore every command; a state-replay visitor
/// overrides only the variants it cares about.
pub trait CommandVisitor {
    fn visit_connection_info(&mut self, _info: &ConnectionInfo) {}
    fn visit_session_info(&mut self, _info: &SessionInfo) {}
    fn visit_producer_info(&mut self, _info: &ProducerInfo) {}
    fn visit_consumer_info(&mut self, _info: &ConsumerInfo) {}
    fn visit_remove_info(&mut self, _info: &RemoveInfo) {}
    fn visit_transaction_info(&mut self, _info: &TransactionInfo) {}
    fn visit_other(&mut self, _command: &Command) {}
}

pub fn dispatch(command: &Command, visitor: &mut dyn CommandVisitor) {
    match &command.body {
        CommandBody::ConnectionInfo(info) => visitor.visit_connection_info(info),
        CommandBody::SessionInfo(info) => visitor.visit_session_info(info),
        CommandBody::ProducerInfo(info) => visitor.visit_producer_info(info),
        CommandBody::ConsumerInfo(info) => visitor.visit_consumer_info(info),
        CommandBody::RemoveInfo(info) => visitor.visit_remove_info(info),
        CommandBody::TransactionInfo(info) => visitor.visit_transaction_info(info),
        _ => visitor.visit_other(command),
    }
}

/// Accumulates the live set of connection/session/producer/consumer
/// registrations, dropping an entry when its matching `RemoveInfo`
/// passes through. Replaying this set's commands, in insertion order,
/// onto a fresh transport reproduces the broker-side state a dropped
/// link had built up before the reconnect.
#[derive(Debug, Default)]
pub struct StateReplayLog {
    connections: Vec<ConnectionInfo>,
    sessions: Vec<SessionInfo>,
    producers: Vec<ProducerInfo>,
    consumers: Vec<ConsumerInfo>,
    /// Transactions seen as `BEGIN` with no terminal frame
    /// (`COMMIT1PC`/`COMMIT2PC`/`ROLLBACK`/`FORGET`) yet.
    open_transactions: Vec<TransactionInfo>,
}

impl StateReplayLog {
    pub fn new() -> Self {
        StateReplayLog::default()
    }

    pub fn record(&mut self, command: &Command) {
        dispatch(command, self);
    }

    /// Commands to replay, in the order a fresh transport should see
    /// them: connections first, then sessions, then producers and
    /// consumers, then a `BEGIN` for every transaction still open.
    pub fn replay_commands(&self) -> Vec<Command> {
        let mut out = Vec::with_capacity(
            self.connections.len()
                + self.sessions.len()
                + self.producers.len()
                + self.consumers.len()
                + self.open_transactions.len(),
        );
        out.extend(
            self.connections
                .iter()
                .cloned()
                .map(CommandBody::ConnectionInfo)
                .map(Command::new),
        );
        out.extend(
            self.sessions
                .iter()
                .cloned()
                .map(CommandBody::SessionInfo)
                .map(Command::new),
        );
        out.extend(
            self.producers
                .iter()
                .cloned()
                .map(CommandBody::ProducerInfo)
                .map(Command::new),
        );
        out.extend(
            self.consumers
                .iter()
                .cloned()
                .map(CommandBody::ConsumerInfo)
                .map(Command::new),
        );
        out.extend(
            self.open_transactions
                .iter()
                .cloned()
                .map(CommandBody::TransactionInfo)
                .map(Command::new),
        );
        out
    }
}

impl CommandVisitor for StateReplayLog {
    fn visit_connection_info(&mut self, info: &ConnectionInfo) {
        self.connections.push(info.clone());
    }

    fn visit_session_info(&mut self, info: &SessionInfo) {
        self.sessions.push(info.clone());
    }

    fn visit_producer_info(&mut self, info: &ProducerInfo) {
        self.producers.push(info.clone());
    }

    fn visit_consumer_info(&mut self, info: &ConsumerInfo) {
        self.consumers.push(info.clone());
    }

    fn visit_remove_info(&mut self, info: &RemoveInfo) {
        match &info.target {
            RemovableId::Connection(id) => self.connections.retain(|c| &c.connection_id != id),
            RemovableId::Session(id) => self.sessions.retain(|s| &s.session_id != id),
            RemovableId::Producer(id) => self.producers.retain(|p| &p.producer_id != id),
            RemovableId::Consumer(id) => self.consumers.retain(|c| &c.consumer_id != id),
        }
    }

    fn visit_transaction_info(&mut self, info: &TransactionInfo) {
        match info.kind {
            TransactionKind::Begin => self.open_transactions.push(info.clone()),
            TransactionKind::Commit1Phase
            | TransactionKind::Commit2Phase
            | TransactionKind::Rollback
            | TransactionKind::Forget => self
                .open_transactions
                .retain(|t| t.transaction_id != info.transaction_id),
            TransactionKind::Prepare | TransactionKind::End | TransactionKind::Recover => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::ConnectionId;

    fn connection(id: &str) -> Command {
        Command::new(CommandBody::ConnectionInfo(ConnectionInfo {
            connection_id: ConnectionId(id.into()),
            client_id: None,
        }))
    }

    #[test]
    fn replays_recorded_connections_in_order() {
        let mut log = StateReplayLog::new();
        log.record(&connection("C:1"));
        log.record(&connection("C:2"));
        let replayed = log.replay_commands();
        assert_eq!(replayed.len(), 2);
        assert!(matches!(&replayed[0].body, CommandBody::ConnectionInfo(i) if i.connection_id.0 == "C:1"));
        assert!(matches!(&replayed[1].body, CommandBody::ConnectionInfo(i) if i.connection_id.0 == "C:2"));
    }

    #[test]
    fn remove_info_drops_the_matching_entry() {
        let mut log = StateReplayLog::new();
        log.record(&connection("C:1"));
        log.record(&connection("C:2"));
        log.record(&Command::new(CommandBody::RemoveInfo(RemoveInfo {
            target: RemovableId::Connection(ConnectionId("C:1".into())),
        })));
        let replayed = log.replay_commands();
        assert_eq!(replayed.len(), 1);
        assert!(matches!(&replayed[0].body, CommandBody::ConnectionInfo(i) if i.connection_id.0 == "C:2"));
    }

    #[test]
    fn open_transactions_replay_as_begin_and_close_on_commit_or_rollback() {
        let mut log = StateReplayLog::new();
        log.record(&Command::new(CommandBody::TransactionInfo(TransactionInfo {
            transaction_id: "TX:1".into(),
            kind: TransactionKind::Begin,
        })));
        log.record(&Command::new(CommandBody::TransactionInfo(TransactionInfo {
            transaction_id: "TX:2".into(),
            kind: TransactionKind::Begin,
        })));
        log.record(&Command::new(CommandBody::TransactionInfo(TransactionInfo {
            transaction_id: "TX:2".into(),
            kind: TransactionKind::Rollback,
        })));

        let replayed = log.replay_commands();
        let transactions: Vec<_> = replayed
            .iter()
            .filter_map(|c| match &c.body {
                CommandBody::TransactionInfo(info) => Some(info),
                _ => None,
            })
            .collect();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transaction_id, "TX:1");
        assert_eq!(transactions[0].kind, TransactionKind::Begin);
    }

    #[test]
    fn unrecognised_commands_fall_through_to_visit_other() {
        struct Counter(usize);
        impl CommandVisitor for Counter {
            fn visit_other(&mut self, _command: &Command) {
                self.0 += 1;
            }
        }
        let mut counter = Counter(0);
        dispatch(
            &Command::new(CommandBody::KeepAliveInfo(crate::command::KeepAliveInfo)),
            &mut counter,
        );
        assert_eq!(counter.0, 1);
    }
}
