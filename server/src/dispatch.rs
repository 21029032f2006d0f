//! Request dispatcher for logged-in connections.
//!
//! One payload in, at most one direct reply out, plus notices to the
//! sender's groupmates. Payloads that do not parse are ignored and the
//! connection stays open.

use chrono::Local;
use log::{debug, info};
use shared::{ConnectStatus, Request, Response};

use crate::error::Result;
use crate::hub::Hub;
use crate::registry::ConnId;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl Hub {
    pub(crate) fn handle_request(
        &mut self,
        conn_id: ConnId,
        name: &str,
        payload: &str,
    ) -> Result<()> {
        let request = match serde_json::from_str::<Request>(payload) {
            Ok(request) => request,
            Err(e) => {
                debug!("Ignoring unreadable request from {}: {}", name, e);
                return Ok(());
            }
        };

        match request {
            Request::Connect { target } => self.connect(conn_id, name, &target),
            Request::Exchange { message } => {
                self.exchange(name, &message);
                Ok(())
            }
            Request::Disconnect => {
                self.disconnect(name);
                Ok(())
            }
            Request::List => {
                let results = self.peer_summary();
                self.send_to(conn_id, &Response::List { results })
            }
            Request::Poem { target } => {
                let results = match target.trim().parse::<usize>() {
                    Ok(n) if n > 0 => self.corpus.get_poem(n),
                    _ => Vec::new(),
                };
                self.send_to(conn_id, &Response::Poem { results })
            }
            Request::Time => {
                let results = Local::now().format(TIME_FORMAT).to_string();
                self.send_to(conn_id, &Response::Time { results })
            }
            Request::Search { target } => {
                let results = self
                    .indices
                    .get(name)
                    .map(|index| index.search(&target))
                    .unwrap_or_default();
                self.send_to(conn_id, &Response::Search { results })
            }
            Request::Login { .. } => {
                debug!("{} sent a second login, ignoring", name);
                Ok(())
            }
        }
    }

    fn connect(&mut self, conn_id: ConnId, name: &str, target: &str) -> Result<()> {
        if target == name {
            return self.send_to(
                conn_id,
                &Response::Connect {
                    status: ConnectStatus::SelfTarget,
                    from: None,
                    msg: "Cannot connect to yourself".to_string(),
                },
            );
        }
        if !self.groups.is_member(target) {
            return self.send_to(
                conn_id,
                &Response::Connect {
                    status: ConnectStatus::NoUser,
                    from: None,
                    msg: format!("{} not online", target),
                },
            );
        }

        self.groups.connect(name, target);
        info!("{} connected to {}", name, target);
        self.send_to(
            conn_id,
            &Response::Connect {
                status: ConnectStatus::Success,
                from: None,
                msg: format!("Connected to {}", target),
            },
        )?;

        let peers = self.groups.members_of(name);
        let notice = Response::Connect {
            status: ConnectStatus::Request,
            from: Some(name.to_string()),
            msg: format!("{} has joined the chat.", name),
        };
        self.notify(peers.get(1..).unwrap_or_default(), &notice);
        Ok(())
    }

    fn exchange(&mut self, name: &str, message: &str) {
        if let Some(index) = self.indices.get_mut(name) {
            index.add_msg_and_index(&format!("{}: {}", name, message));
        }

        let peers = self.groups.members_of(name);
        let relay = Response::Exchange {
            from: name.to_string(),
            message: message.to_string(),
        };
        self.notify(peers.get(1..).unwrap_or_default(), &relay);
    }

    fn disconnect(&mut self, name: &str) {
        let remaining = self.groups.disconnect(name);
        let notice = Response::Disconnect {
            from: Some(name.to_string()),
            msg: format!("{} has left the chat.", name),
        };
        self.notify(&remaining, &notice);

        if remaining.len() == 1 {
            let alone = Response::Disconnect {
                from: None,
                msg: "Everyone left, you are alone.".to_string(),
            };
            self.notify(&remaining, &alone);
        }
    }

    /// `"<user>:<peer count>"` for every online user, login order
    fn peer_summary(&self) -> String {
        self.registry
            .all_authenticated()
            .iter()
            .map(|user| {
                let peers = self.groups.members_of(user).len().saturating_sub(1);
                format!("{}:{}", user, peers)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::*;

    fn connect(hub: &mut Hub, conn_id: ConnId, target: &str) {
        request(
            hub,
            conn_id,
            &Request::Connect {
                target: target.to_string(),
            },
        );
    }

    fn say(hub: &mut Hub, conn_id: ConnId, message: &str) {
        request(
            hub,
            conn_id,
            &Request::Exchange {
                message: message.to_string(),
            },
        );
    }

    #[test]
    fn test_connect_to_self() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");

        connect(&mut hub, alice, "alice");

        assert_eq!(
            drain(&mut rx),
            vec![Response::Connect {
                status: ConnectStatus::SelfTarget,
                from: None,
                msg: "Cannot connect to yourself".to_string(),
            }]
        );
        assert_eq!(hub.groups().members_of("alice"), vec!["alice"]);
    }

    #[test]
    fn test_connect_to_offline_user() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");

        connect(&mut hub, alice, "bob");

        assert_eq!(
            drain(&mut rx),
            vec![Response::Connect {
                status: ConnectStatus::NoUser,
                from: None,
                msg: "bob not online".to_string(),
            }]
        );
    }

    #[test]
    fn test_connect_notifies_whole_group() {
        let (mut hub, _dir) = hub();
        let (alice, mut alice_rx) = login(&mut hub, "alice");
        let (_bob, mut bob_rx) = login(&mut hub, "bob");
        let (carol, mut carol_rx) = login(&mut hub, "carol");

        connect(&mut hub, alice, "bob");
        assert_eq!(drain(&mut alice_rx).len(), 1);
        assert_eq!(
            drain(&mut bob_rx),
            vec![Response::Connect {
                status: ConnectStatus::Request,
                from: Some("alice".to_string()),
                msg: "alice has joined the chat.".to_string(),
            }]
        );

        connect(&mut hub, carol, "alice");
        assert_eq!(
            drain(&mut carol_rx),
            vec![Response::Connect {
                status: ConnectStatus::Success,
                from: None,
                msg: "Connected to alice".to_string(),
            }]
        );
        for rx in [&mut alice_rx, &mut bob_rx] {
            let notices = drain(rx);
            assert_eq!(notices.len(), 1);
            assert!(matches!(
                &notices[0],
                Response::Connect { from: Some(from), .. } if from == "carol"
            ));
        }
        assert_eq!(hub.groups().members_of("bob").len(), 3);
    }

    #[test]
    fn test_exchange_reaches_peers_but_not_sender() {
        let (mut hub, _dir) = hub();
        let (alice, mut alice_rx) = login(&mut hub, "alice");
        let (_bob, mut bob_rx) = login(&mut hub, "bob");
        let (_carol, mut carol_rx) = login(&mut hub, "carol");
        connect(&mut hub, alice, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        say(&mut hub, alice, "hi bob");

        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut carol_rx).is_empty());
        assert_eq!(
            drain(&mut bob_rx),
            vec![Response::Exchange {
                from: "alice".to_string(),
                message: "hi bob".to_string(),
            }]
        );
        assert_eq!(
            hub.index_for("alice").unwrap().lines(),
            &["alice: hi bob"]
        );
        assert_eq!(hub.index_for("bob").unwrap().msg_size(), 0);
    }

    #[test]
    fn test_exchange_alone_is_only_indexed() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");

        say(&mut hub, alice, "talking to myself");

        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.index_for("alice").unwrap().msg_size(), 1);
    }

    #[test]
    fn test_disconnect_from_pair_sends_one_alone_notice() {
        let (mut hub, _dir) = hub();
        let (alice, mut alice_rx) = login(&mut hub, "alice");
        let (_bob, mut bob_rx) = login(&mut hub, "bob");
        connect(&mut hub, alice, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        request(&mut hub, alice, &Request::Disconnect);

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(
            drain(&mut bob_rx),
            vec![
                Response::Disconnect {
                    from: Some("alice".to_string()),
                    msg: "alice has left the chat.".to_string(),
                },
                Response::Disconnect {
                    from: None,
                    msg: "Everyone left, you are alone.".to_string(),
                },
            ]
        );
        assert_eq!(hub.groups().members_of("alice"), vec!["alice"]);
        assert_eq!(hub.groups().members_of("bob"), vec!["bob"]);
    }

    #[test]
    fn test_disconnect_from_trio_has_no_alone_notice() {
        let (mut hub, _dir) = hub();
        let (alice, mut alice_rx) = login(&mut hub, "alice");
        let (_bob, mut bob_rx) = login(&mut hub, "bob");
        let (carol, mut carol_rx) = login(&mut hub, "carol");
        connect(&mut hub, alice, "bob");
        connect(&mut hub, carol, "bob");
        for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
            drain(rx);
        }

        request(&mut hub, carol, &Request::Disconnect);

        for rx in [&mut alice_rx, &mut bob_rx] {
            let notices = drain(rx);
            assert_eq!(notices.len(), 1);
            assert!(matches!(
                &notices[0],
                Response::Disconnect { from: Some(from), .. } if from == "carol"
            ));
        }
        assert_eq!(hub.groups().members_of("alice").len(), 2);
    }

    #[test]
    fn test_disconnect_when_alone_is_silent() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");

        request(&mut hub, alice, &Request::Disconnect);

        assert!(drain(&mut rx).is_empty());
        assert!(hub.groups().is_member("alice"));
    }

    #[test]
    fn test_list_counts_peers() {
        let (mut hub, _dir) = hub();
        let (alice, mut alice_rx) = login(&mut hub, "alice");
        let (_bob, _bob_rx) = login(&mut hub, "bob");
        let (_carol, _carol_rx) = login(&mut hub, "carol");
        connect(&mut hub, alice, "bob");
        drain(&mut alice_rx);

        request(&mut hub, alice, &Request::List);

        assert_eq!(
            drain(&mut alice_rx),
            vec![Response::List {
                results: "alice:1, bob:1, carol:0".to_string()
            }]
        );
    }

    #[test]
    fn test_poem_lookup() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");

        for target in ["1", " 1 ", "0", "-1", "x", "", "99"] {
            request(
                &mut hub,
                alice,
                &Request::Poem {
                    target: target.to_string(),
                },
            );
        }

        let results: Vec<Vec<String>> = drain(&mut rx)
            .into_iter()
            .map(|response| match response {
                Response::Poem { results } => results,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        let first = vec!["I.", "First poem line", ""];
        assert_eq!(results[0], first);
        assert_eq!(results[1], first);
        assert!(results[2..].iter().all(Vec::is_empty));
        assert_eq!(results.len(), 7);
    }

    #[test]
    fn test_time_format() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");

        request(&mut hub, alice, &Request::Time);

        let responses = drain(&mut rx);
        let Response::Time { results } = &responses[0] else {
            panic!("unexpected {responses:?}");
        };
        assert!(chrono::NaiveDateTime::parse_from_str(results, TIME_FORMAT).is_ok());
    }

    #[test]
    fn test_search_own_history() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");
        say(&mut hub, alice, "How are you?");
        say(&mut hub, alice, "I am fine.");

        for target in ["How", "fine", "nothing"] {
            request(
                &mut hub,
                alice,
                &Request::Search {
                    target: target.to_string(),
                },
            );
        }

        assert_eq!(
            drain(&mut rx),
            vec![
                Response::Search {
                    results: "0: alice: How are you?\n".to_string()
                },
                Response::Search {
                    results: "1: alice: I am fine.\n".to_string()
                },
                Response::Search {
                    results: String::new()
                },
            ]
        );
    }

    #[test]
    fn test_malformed_request_is_ignored() {
        let (mut hub, _dir) = hub();
        let (alice, mut rx) = login(&mut hub, "alice");

        hub.handle_payload(alice, "{not json");
        hub.handle_payload(alice, r#"{"action":"dance"}"#);
        hub.handle_payload(alice, r#"{"action":"login","name":"mallory"}"#);

        assert!(drain(&mut rx).is_empty());
        assert!(hub.registry().is_authenticated(alice));
        assert!(!hub.groups().is_member("mallory"));
    }
}
