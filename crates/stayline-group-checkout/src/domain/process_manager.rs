//! The group checkout process manager.
//!
//! Pure decision logic: given the current state and an input, return the
//! next state together with the events to publish and the commands to
//! schedule. Nothing here performs I/O.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stayline_core::error::DomainError;
use stayline_guest_stay::domain::commands::CheckOutGuest;
use uuid::Uuid;

use super::commands::InitiateGroupCheckout;
use super::events::{
    GroupCheckoutCompleted, GroupCheckoutEventKind, GroupCheckoutFailed, GroupCheckoutInitiated,
    GuestCheckoutCompleted, GuestCheckoutFailed,
};

/// Status of one member and of the group as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    /// Not yet requested.
    Pending,
    /// Requested, outcome unknown.
    Initiated,
    /// Checked out.
    Completed,
    /// Refused.
    Failed,
}

impl CheckoutStatus {
    /// `true` once an outcome is known. Terminal statuses never change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What happened to one member's checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    /// The guest checked out.
    Completed,
    /// The checkout was refused.
    Failed,
}

/// One guest stay taking part in a group checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// Where this member's checkout stands.
    pub status: CheckoutStatus,
}

/// Document kind under which group checkout state is stored.
pub const GROUP_CHECKOUTS_KIND: &str = "group_checkouts";

/// Process manager state, stored as a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheckout {
    /// The group checkout identifier.
    pub id: Uuid,
    /// The clerk who requested it.
    pub clerk_id: Uuid,
    /// Members in the order they were requested.
    pub members: Vec<GroupMember>,
    /// Overall status.
    pub status: CheckoutStatus,
    /// When the checkout started.
    pub initiated_at: DateTime<Utc>,
    /// When the group reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Version of the group's stream once this state's events are published.
    pub stream_version: i64,
}

/// Everything produced by starting a group checkout.
#[derive(Debug, Clone)]
pub struct Initiation {
    /// The new state.
    pub checkout: GroupCheckout,
    /// Events to publish.
    pub events: Vec<GroupCheckoutEventKind>,
    /// One checkout command per member.
    pub commands: Vec<CheckOutGuest>,
}

impl GroupCheckout {
    /// Starts a group checkout. Every member goes straight from pending to
    /// initiated, since a checkout command is scheduled for each of them.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the member list is empty or
    /// contains duplicates.
    pub fn initiate(
        command: &InitiateGroupCheckout,
        now: DateTime<Utc>,
    ) -> Result<Initiation, DomainError> {
        if command.guest_stay_ids.is_empty() {
            return Err(DomainError::Validation(
                "a group checkout needs at least one guest stay".to_owned(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = command.guest_stay_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(DomainError::Validation(format!(
                "guest stay {duplicate} appears more than once"
            )));
        }

        let checkout = Self {
            id: command.group_checkout_id,
            clerk_id: command.clerk_id,
            members: command
                .guest_stay_ids
                .iter()
                .map(|&guest_stay_id| GroupMember {
                    guest_stay_id,
                    status: CheckoutStatus::Initiated,
                })
                .collect(),
            status: CheckoutStatus::Initiated,
            initiated_at: now,
            finished_at: None,
            stream_version: 1,
        };
        let events = vec![GroupCheckoutEventKind::GroupCheckoutInitiated(
            GroupCheckoutInitiated {
                group_checkout_id: checkout.id,
                clerk_id: checkout.clerk_id,
                guest_stay_ids: command.guest_stay_ids.clone(),
                initiated_at: now,
            },
        )];
        let commands = checkout.pending_commands(command.correlation_id);

        Ok(Initiation {
            checkout,
            events,
            commands,
        })
    }

    /// Rebuilds the state from the group's published events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the history does not start with
    /// `group_checkout.initiated`.
    pub fn replay(history: &[GroupCheckoutEventKind]) -> Result<Self, DomainError> {
        let Some((GroupCheckoutEventKind::GroupCheckoutInitiated(initiated), rest)) =
            history.split_first()
        else {
            return Err(DomainError::Validation(
                "group checkout history must start with its initiation".to_owned(),
            ));
        };
        let mut checkout = Self {
            id: initiated.group_checkout_id,
            clerk_id: initiated.clerk_id,
            members: initiated
                .guest_stay_ids
                .iter()
                .map(|&guest_stay_id| GroupMember {
                    guest_stay_id,
                    status: CheckoutStatus::Initiated,
                })
                .collect(),
            status: CheckoutStatus::Initiated,
            initiated_at: initiated.initiated_at,
            finished_at: None,
            stream_version: 1,
        };
        for event in rest {
            checkout.apply(event);
        }
        Ok(checkout)
    }

    fn apply(&mut self, event: &GroupCheckoutEventKind) {
        match event {
            GroupCheckoutEventKind::GroupCheckoutInitiated(_) => {}
            GroupCheckoutEventKind::GuestCheckoutCompleted(e) => {
                self.set_member_status(e.guest_stay_id, CheckoutStatus::Completed);
            }
            GroupCheckoutEventKind::GuestCheckoutFailed(e) => {
                self.set_member_status(e.guest_stay_id, CheckoutStatus::Failed);
            }
            GroupCheckoutEventKind::GroupCheckoutCompleted(e) => {
                self.status = CheckoutStatus::Completed;
                self.finished_at = Some(e.completed_at);
            }
            GroupCheckoutEventKind::GroupCheckoutFailed(e) => {
                self.status = CheckoutStatus::Failed;
                self.finished_at = Some(e.failed_at);
            }
        }
        self.stream_version += 1;
    }

    fn set_member_status(&mut self, guest_stay_id: Uuid, status: CheckoutStatus) {
        if let Some(member) = self
            .members
            .iter_mut()
            .find(|member| member.guest_stay_id == guest_stay_id)
        {
            member.status = status;
        }
    }

    /// One checkout command for every member still waiting for an outcome.
    /// Nothing is pending once the group has finished.
    #[must_use]
    pub fn pending_commands(&self, correlation_id: Uuid) -> Vec<CheckOutGuest> {
        if self.status.is_terminal() {
            return Vec::new();
        }
        self.members
            .iter()
            .filter(|member| !member.status.is_terminal())
            .map(|member| CheckOutGuest {
                correlation_id,
                guest_stay_id: member.guest_stay_id,
                group_checkout_id: Some(self.id),
            })
            .collect()
    }

    /// The status of `guest_stay_id`, or `None` if it is not a member.
    #[must_use]
    pub fn member_status(&self, guest_stay_id: Uuid) -> Option<CheckoutStatus> {
        self.members
            .iter()
            .find(|member| member.guest_stay_id == guest_stay_id)
            .map(|member| member.status)
    }

    /// Folds one member's outcome into the state and returns the events to
    /// publish. Outcomes for non-members, for members that already have one,
    /// or for a group that already finished produce nothing.
    pub fn record_outcome(
        &mut self,
        guest_stay_id: Uuid,
        outcome: MemberOutcome,
        now: DateTime<Utc>,
    ) -> Vec<GroupCheckoutEventKind> {
        if self.status.is_terminal() {
            return Vec::new();
        }
        let Some(member) = self
            .members
            .iter_mut()
            .find(|member| member.guest_stay_id == guest_stay_id)
        else {
            return Vec::new();
        };
        if member.status.is_terminal() {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        match outcome {
            MemberOutcome::Completed => {
                member.status = CheckoutStatus::Completed;
                events.push(GroupCheckoutEventKind::GuestCheckoutCompleted(
                    GuestCheckoutCompleted {
                        group_checkout_id: self.id,
                        guest_stay_id,
                        completed_at: now,
                    },
                ));
            }
            MemberOutcome::Failed => {
                member.status = CheckoutStatus::Failed;
                events.push(GroupCheckoutEventKind::GuestCheckoutFailed(
                    GuestCheckoutFailed {
                        group_checkout_id: self.id,
                        guest_stay_id,
                        failed_at: now,
                    },
                ));
            }
        }

        if let Some(finished) = self.finish(now) {
            events.push(finished);
        }
        self.stream_version += i64::try_from(events.len()).unwrap_or(i64::MAX);
        events
    }

    fn finish(&mut self, now: DateTime<Utc>) -> Option<GroupCheckoutEventKind> {
        if !self.members.iter().all(|member| member.status.is_terminal()) {
            return None;
        }
        let ids_with = |status: CheckoutStatus| {
            self.members
                .iter()
                .filter(|member| member.status == status)
                .map(|member| member.guest_stay_id)
                .collect::<Vec<_>>()
        };
        let completed_checkouts = ids_with(CheckoutStatus::Completed);
        let failed_checkouts = ids_with(CheckoutStatus::Failed);

        self.finished_at = Some(now);
        if failed_checkouts.is_empty() {
            self.status = CheckoutStatus::Completed;
            Some(GroupCheckoutEventKind::GroupCheckoutCompleted(
                GroupCheckoutCompleted {
                    group_checkout_id: self.id,
                    completed_checkouts,
                    completed_at: now,
                },
            ))
        } else {
            self.status = CheckoutStatus::Failed;
            Some(GroupCheckoutEventKind::GroupCheckoutFailed(
                GroupCheckoutFailed {
                    group_checkout_id: self.id,
                    completed_checkouts,
                    failed_checkouts,
                    failed_at: now,
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn initiate(members: &[Uuid]) -> Initiation {
        GroupCheckout::initiate(
            &InitiateGroupCheckout {
                correlation_id: Uuid::new_v4(),
                group_checkout_id: Uuid::new_v4(),
                clerk_id: Uuid::new_v4(),
                guest_stay_ids: members.to_vec(),
            },
            now(),
        )
        .unwrap()
    }

    fn event_types(events: &[GroupCheckoutEventKind]) -> Vec<&'static str> {
        events.iter().map(GroupCheckoutEventKind::event_type).collect()
    }

    #[test]
    fn test_initiate_marks_members_initiated_and_schedules_checkouts() {
        // Arrange
        let members = [Uuid::new_v4(), Uuid::new_v4()];

        // Act
        let initiation = initiate(&members);

        // Assert
        let checkout = &initiation.checkout;
        assert_eq!(checkout.status, CheckoutStatus::Initiated);
        assert!(
            checkout
                .members
                .iter()
                .all(|member| member.status == CheckoutStatus::Initiated)
        );
        assert_eq!(event_types(&initiation.events), vec!["group_checkout.initiated"]);
        let scheduled: Vec<Uuid> = initiation
            .commands
            .iter()
            .map(|command| command.guest_stay_id)
            .collect();
        assert_eq!(scheduled, members.to_vec());
        assert!(
            initiation
                .commands
                .iter()
                .all(|command| command.group_checkout_id == Some(checkout.id))
        );
    }

    #[test]
    fn test_initiate_rejects_empty_and_duplicate_members() {
        let id = Uuid::new_v4();
        for members in [vec![], vec![id, Uuid::new_v4(), id]] {
            let result = GroupCheckout::initiate(
                &InitiateGroupCheckout {
                    correlation_id: Uuid::new_v4(),
                    group_checkout_id: Uuid::new_v4(),
                    clerk_id: Uuid::new_v4(),
                    guest_stay_ids: members,
                },
                now(),
            );

            assert!(matches!(result, Err(DomainError::Validation(_))));
        }
    }

    #[test]
    fn test_outcome_sequences() {
        use MemberOutcome::{Completed, Failed};

        // (outcomes as (member index, outcome), expected final status,
        //  expected event types across the whole sequence)
        let cases: Vec<(Vec<(usize, MemberOutcome)>, CheckoutStatus, Vec<&str>)> = vec![
            (
                vec![(0, Completed), (1, Completed)],
                CheckoutStatus::Completed,
                vec![
                    "group_checkout.guest_checkout_completed",
                    "group_checkout.guest_checkout_completed",
                    "group_checkout.completed",
                ],
            ),
            (
                vec![(0, Completed), (0, Completed), (1, Completed)],
                CheckoutStatus::Completed,
                vec![
                    "group_checkout.guest_checkout_completed",
                    "group_checkout.guest_checkout_completed",
                    "group_checkout.completed",
                ],
            ),
            (
                vec![(0, Failed), (1, Completed)],
                CheckoutStatus::Failed,
                vec![
                    "group_checkout.guest_checkout_failed",
                    "group_checkout.guest_checkout_completed",
                    "group_checkout.failed",
                ],
            ),
            (
                vec![(0, Completed), (0, Failed), (1, Completed), (1, Completed)],
                CheckoutStatus::Completed,
                vec![
                    "group_checkout.guest_checkout_completed",
                    "group_checkout.guest_checkout_completed",
                    "group_checkout.completed",
                ],
            ),
            (
                vec![(1, Failed)],
                CheckoutStatus::Initiated,
                vec!["group_checkout.guest_checkout_failed"],
            ),
        ];

        for (outcomes, expected_status, expected_events) in cases {
            let members = [Uuid::new_v4(), Uuid::new_v4()];
            let mut checkout = initiate(&members).checkout;

            let mut events = Vec::new();
            for (index, outcome) in &outcomes {
                events.extend(checkout.record_outcome(members[*index], *outcome, now()));
            }

            assert_eq!(checkout.status, expected_status, "outcomes: {outcomes:?}");
            assert_eq!(event_types(&events), expected_events, "outcomes: {outcomes:?}");
        }
    }

    #[test]
    fn test_terminal_group_ignores_late_outcomes() {
        let member = Uuid::new_v4();
        let mut checkout = initiate(&[member]).checkout;
        checkout.record_outcome(member, MemberOutcome::Failed, now());

        let events = checkout.record_outcome(member, MemberOutcome::Completed, now());

        assert!(events.is_empty());
        assert_eq!(checkout.status, CheckoutStatus::Failed);
        assert_eq!(checkout.member_status(member), Some(CheckoutStatus::Failed));
        assert_eq!(checkout.finished_at, Some(now()));
    }

    #[test]
    fn test_outcome_for_non_member_is_ignored() {
        let mut checkout = initiate(&[Uuid::new_v4()]).checkout;

        let events = checkout.record_outcome(Uuid::new_v4(), MemberOutcome::Completed, now());

        assert!(events.is_empty());
        assert_eq!(checkout.status, CheckoutStatus::Initiated);
    }

    #[test]
    fn test_failed_group_lists_both_sides() {
        let ok = Uuid::new_v4();
        let refused = Uuid::new_v4();
        let mut checkout = initiate(&[ok, refused]).checkout;
        checkout.record_outcome(ok, MemberOutcome::Completed, now());

        let events = checkout.record_outcome(refused, MemberOutcome::Failed, now());

        match events.last() {
            Some(GroupCheckoutEventKind::GroupCheckoutFailed(failed)) => {
                assert_eq!(failed.completed_checkouts, vec![ok]);
                assert_eq!(failed.failed_checkouts, vec![refused]);
            }
            other => panic!("expected GroupCheckoutFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_replay_rebuilds_state_from_published_events() {
        // Arrange
        let members = [Uuid::new_v4(), Uuid::new_v4()];
        let initiation = initiate(&members);
        let mut checkout = initiation.checkout.clone();
        let mut history = initiation.events;
        history.extend(checkout.record_outcome(members[0], MemberOutcome::Completed, now()));
        history.extend(checkout.record_outcome(members[1], MemberOutcome::Failed, now()));

        // Act
        let replayed = GroupCheckout::replay(&history).unwrap();

        // Assert
        assert_eq!(replayed, checkout);
        assert_eq!(replayed.status, CheckoutStatus::Failed);
        assert_eq!(replayed.stream_version, 4);
    }

    #[test]
    fn test_replay_requires_initiation_first() {
        let history = vec![GroupCheckoutEventKind::GuestCheckoutCompleted(
            GuestCheckoutCompleted {
                group_checkout_id: Uuid::new_v4(),
                guest_stay_id: Uuid::new_v4(),
                completed_at: now(),
            },
        )];

        let result = GroupCheckout::replay(&history);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_pending_commands_skip_members_with_an_outcome() {
        let members = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut checkout = initiate(&members).checkout;
        checkout.record_outcome(members[1], MemberOutcome::Completed, now());
        let correlation_id = Uuid::new_v4();

        let pending: Vec<Uuid> = checkout
            .pending_commands(correlation_id)
            .iter()
            .map(|command| command.guest_stay_id)
            .collect();

        assert_eq!(pending, vec![members[0], members[2]]);
        assert_eq!(checkout.stream_version, 2);
    }
}
