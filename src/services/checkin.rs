//! Check-in state machine.
//!
//! Per-registration state is the pair (attended, checked_out_at) with three
//! derived labels: OUT (never attended), IN (attended, not checked out) and
//! CHECKED_OUT. Scans plan a transition from a snapshot, then apply it as a
//! conditional row update plus an audit insert inside one transaction. Two
//! near-simultaneous scans for the same registration race on the update's
//! WHERE clause; the loser sees zero rows, re-reads, and reports the
//! appropriate no-op outcome instead of corrupting state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    attendance_event::{AttendanceAction, AttendanceEvent},
    event::Event,
    registration::Registration,
};
use crate::services::scancode;

/// Repeat IN scans within this window are suppressed as DUPLICATE
pub const DUPLICATE_WINDOW_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    In,
    Out,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanOutcome {
    /// First check-in
    In,
    /// Re-entry after a checkout; stored shape is identical to In
    ReIn,
    /// Same code scanned again within the duplicate window; no-op
    Duplicate,
    /// IN requested but already in, outside the window; no-op
    AlreadyIn,
    /// Checked out
    Out,
    /// OUT requested without a prior check-in; no-op
    NotIn,
}

impl ScanOutcome {
    /// Whether this outcome corresponds to a committed state mutation
    pub fn mutated(&self) -> bool {
        matches!(self, ScanOutcome::In | ScanOutcome::ReIn | ScanOutcome::Out)
    }
}

/// Derived state label for one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateLabel {
    Out,
    In,
    CheckedOut,
}

pub fn state_of(registration: &Registration) -> StateLabel {
    match (registration.attended, registration.checked_out_at) {
        (false, _) => StateLabel::Out,
        (true, None) => StateLabel::In,
        (true, Some(_)) => StateLabel::CheckedOut,
    }
}

/// What a scan should do, decided from a state snapshot. Pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    CheckIn { reentry: bool },
    CheckOut,
    Noop(ScanOutcome),
}

pub fn plan(registration: &Registration, mode: ScanMode, now: DateTime<Utc>) -> Plan {
    let state = state_of(registration);

    // TOGGLE resolves to IN unless currently IN
    let checking_in = match mode {
        ScanMode::In => true,
        ScanMode::Out => false,
        ScanMode::Toggle => state != StateLabel::In,
    };

    match (checking_in, state) {
        (true, StateLabel::In) => {
            let within_window = registration
                .scanned_at
                .map(|at| now - at < Duration::seconds(DUPLICATE_WINDOW_SECS))
                .unwrap_or(false);
            if within_window {
                Plan::Noop(ScanOutcome::Duplicate)
            } else {
                Plan::Noop(ScanOutcome::AlreadyIn)
            }
        }
        (true, StateLabel::Out) => Plan::CheckIn { reentry: false },
        (true, StateLabel::CheckedOut) => Plan::CheckIn { reentry: true },
        (false, StateLabel::In) => Plan::CheckOut,
        (false, _) => Plan::Noop(ScanOutcome::NotIn),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub result: ScanOutcome,
    pub registration: Registration,
}

/// Applies one scan. The registration update and its audit row commit as a
/// single transaction; a lost race degrades to the matching no-op outcome.
pub async fn apply_scan(
    pool: &PgPool,
    registration: Registration,
    mode: ScanMode,
    actor_label: &str,
    now: DateTime<Utc>,
) -> Result<ScanResult, AppError> {
    match plan(&registration, mode, now) {
        Plan::Noop(result) => Ok(ScanResult {
            result,
            registration,
        }),

        Plan::CheckIn { reentry } => {
            let mut tx = pool.begin().await?;
            match Registration::check_in_cas(&mut *tx, registration.id, actor_label, now).await? {
                Some(updated) => {
                    AttendanceEvent::insert(
                        &mut *tx,
                        updated.id,
                        updated.event_id,
                        AttendanceAction::In,
                        actor_label,
                    )
                    .await?;
                    tx.commit().await?;

                    let result = if reentry {
                        ScanOutcome::ReIn
                    } else {
                        ScanOutcome::In
                    };
                    tracing::info!(
                        registration_id = %updated.id,
                        actor = actor_label,
                        reentry,
                        "Checked in"
                    );
                    Ok(ScanResult {
                        result,
                        registration: updated,
                    })
                }
                // A concurrent scan won the race: the row is already IN.
                None => {
                    drop(tx);
                    let fresh = refetch(pool, registration.id).await?;
                    let result = match plan(&fresh, ScanMode::In, now) {
                        Plan::Noop(outcome) => outcome,
                        _ => ScanOutcome::AlreadyIn,
                    };
                    Ok(ScanResult {
                        result,
                        registration: fresh,
                    })
                }
            }
        }

        Plan::CheckOut => {
            let mut tx = pool.begin().await?;
            match Registration::check_out_cas(&mut *tx, registration.id, actor_label, now).await? {
                Some(updated) => {
                    AttendanceEvent::insert(
                        &mut *tx,
                        updated.id,
                        updated.event_id,
                        AttendanceAction::Out,
                        actor_label,
                    )
                    .await?;
                    tx.commit().await?;

                    tracing::info!(
                        registration_id = %updated.id,
                        actor = actor_label,
                        "Checked out"
                    );
                    Ok(ScanResult {
                        result: ScanOutcome::Out,
                        registration: updated,
                    })
                }
                None => {
                    drop(tx);
                    let fresh = refetch(pool, registration.id).await?;
                    Ok(ScanResult {
                        result: ScanOutcome::NotIn,
                        registration: fresh,
                    })
                }
            }
        }
    }
}

/// Resolves a scanned token to a registration of this event: a signed
/// reference when it has that shape, otherwise a bare scan code, otherwise
/// a raw registration id. Whatever resolves must belong to the event or
/// the scan is treated as not-found.
pub async fn resolve_registration(
    pool: &PgPool,
    event: &Event,
    token: &str,
    scan_ref_secret: &str,
) -> Result<Option<Registration>, AppError> {
    if scancode::looks_like_reference(token) {
        let Some(registration_id) = scancode::verify_reference(token, event.id, scan_ref_secret)
        else {
            return Ok(None);
        };
        let registration = Registration::find_by_id(pool, registration_id).await?;
        return Ok(registration.filter(|r| r.event_id == event.id));
    }

    if let Some(registration) = Registration::find_by_code(pool, event.id, token).await? {
        return Ok(Some(registration));
    }

    if let Ok(id) = Uuid::parse_str(token) {
        let registration = Registration::find_by_id(pool, id).await?;
        return Ok(registration.filter(|r| r.event_id == event.id));
    }

    Ok(None)
}

/// Result of an admin status update: the final row plus the audit actions
/// the update committed, so the caller can notify per transition.
#[derive(Debug)]
pub struct AdminUpdate {
    pub registration: Registration,
    pub transitions: Vec<AttendanceAction>,
}

/// Admin status update for one registration. Runs under a row lock so the
/// requested flags apply to a stable snapshot; every transition it causes
/// writes its audit row in the same transaction. Corrections (un-attend)
/// reset state without an audit row since no entry/exit was observed.
pub async fn apply_admin_update(
    pool: &PgPool,
    registration_id: Uuid,
    attended: Option<bool>,
    checked_out: Option<bool>,
    paid: Option<bool>,
    actor_label: &str,
    now: DateTime<Utc>,
) -> Result<AdminUpdate, AppError> {
    if attended == Some(false) && checked_out == Some(true) {
        return Err(AppError::InvalidTransition(
            "cannot check out a registration while marking it not attended".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let mut transitions = Vec::new();

    let mut current = Registration::lock(&mut *tx, registration_id)
        .await?
        .ok_or_else(|| AppError::NotFound("registration".to_string()))?;

    if attended == Some(true) && state_of(&current) != StateLabel::In {
        if let Some(updated) =
            Registration::check_in_cas(&mut *tx, current.id, actor_label, now).await?
        {
            AttendanceEvent::insert(
                &mut *tx,
                updated.id,
                updated.event_id,
                AttendanceAction::In,
                actor_label,
            )
            .await?;
            transitions.push(AttendanceAction::In);
            current = updated;
        }
    }

    if attended == Some(false) && current.attended {
        if let Some(updated) = Registration::reset_cas(&mut *tx, current.id).await? {
            current = updated;
        }
    }

    match checked_out {
        // Already checked out: idempotent no-op
        Some(true) if state_of(&current) == StateLabel::CheckedOut => {}
        Some(true) => {
            if state_of(&current) != StateLabel::In {
                return Err(AppError::InvalidTransition(
                    "cannot check out a registration that is not checked in".to_string(),
                ));
            }
            if let Some(updated) =
                Registration::check_out_cas(&mut *tx, current.id, actor_label, now).await?
            {
                AttendanceEvent::insert(
                    &mut *tx,
                    updated.id,
                    updated.event_id,
                    AttendanceAction::Out,
                    actor_label,
                )
                .await?;
                transitions.push(AttendanceAction::Out);
                current = updated;
            }
        }
        // Clearing a checkout readmits the attendee; by the transition
        // rules that is an IN from CHECKED_OUT.
        Some(false) if current.checked_out_at.is_some() => {
            if let Some(updated) =
                Registration::check_in_cas(&mut *tx, current.id, actor_label, now).await?
            {
                AttendanceEvent::insert(
                    &mut *tx,
                    updated.id,
                    updated.event_id,
                    AttendanceAction::In,
                    actor_label,
                )
                .await?;
                transitions.push(AttendanceAction::In);
                current = updated;
            }
        }
        _ => {}
    }

    if let Some(paid) = paid {
        current = Registration::set_paid_on(&mut *tx, current.id, paid).await?;
    }

    tx.commit().await?;

    tracing::info!(
        registration_id = %current.id,
        actor = actor_label,
        state = ?state_of(&current),
        transitions = transitions.len(),
        "Admin updated registration"
    );

    Ok(AdminUpdate {
        registration: current,
        transitions,
    })
}

async fn refetch(pool: &PgPool, id: Uuid) -> Result<Registration, AppError> {
    Registration::find_by_id(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("registration".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_registration(
        attended: bool,
        scanned_at: Option<DateTime<Utc>>,
        checked_out_at: Option<DateTime<Utc>>,
    ) -> Registration {
        let now = Utc::now();
        Registration {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            display_name: None,
            code: "c0ffee".to_string(),
            attended,
            scanned_at,
            scanned_by: scanned_at.map(|_| "S1".to_string()),
            checked_out_at,
            checked_out_by: checked_out_at.map(|_| "admin".to_string()),
            paid: false,
            attributes: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_registration_checks_in() {
        let reg = make_registration(false, None, None);
        assert_eq!(state_of(&reg), StateLabel::Out);
        assert_eq!(
            plan(&reg, ScanMode::In, Utc::now()),
            Plan::CheckIn { reentry: false }
        );
    }

    #[test]
    fn rescan_within_window_is_duplicate() {
        let now = Utc::now();
        let reg = make_registration(true, Some(now - Duration::seconds(2)), None);
        assert_eq!(plan(&reg, ScanMode::In, now), Plan::Noop(ScanOutcome::Duplicate));
    }

    #[test]
    fn rescan_outside_window_is_already_in() {
        let now = Utc::now();
        let reg = make_registration(true, Some(now - Duration::seconds(30)), None);
        assert_eq!(plan(&reg, ScanMode::In, now), Plan::Noop(ScanOutcome::AlreadyIn));
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let now = Utc::now();
        let reg = make_registration(
            true,
            Some(now - Duration::seconds(DUPLICATE_WINDOW_SECS)),
            None,
        );
        assert_eq!(plan(&reg, ScanMode::In, now), Plan::Noop(ScanOutcome::AlreadyIn));
    }

    #[test]
    fn checkout_requires_check_in() {
        let now = Utc::now();
        let out = make_registration(false, None, None);
        assert_eq!(plan(&out, ScanMode::Out, now), Plan::Noop(ScanOutcome::NotIn));

        let checked_out =
            make_registration(true, Some(now - Duration::hours(1)), Some(now));
        assert_eq!(
            plan(&checked_out, ScanMode::Out, now),
            Plan::Noop(ScanOutcome::NotIn)
        );
    }

    #[test]
    fn checked_in_can_check_out() {
        let now = Utc::now();
        let reg = make_registration(true, Some(now - Duration::minutes(10)), None);
        assert_eq!(plan(&reg, ScanMode::Out, now), Plan::CheckOut);
    }

    #[test]
    fn reentry_from_checked_out() {
        let now = Utc::now();
        let reg = make_registration(
            true,
            Some(now - Duration::hours(2)),
            Some(now - Duration::hours(1)),
        );
        assert_eq!(state_of(&reg), StateLabel::CheckedOut);
        assert_eq!(plan(&reg, ScanMode::In, now), Plan::CheckIn { reentry: true });
    }

    #[test]
    fn toggle_resolves_by_current_state() {
        let now = Utc::now();

        let out = make_registration(false, None, None);
        assert_eq!(
            plan(&out, ScanMode::Toggle, now),
            Plan::CheckIn { reentry: false }
        );

        let checked_in = make_registration(true, Some(now - Duration::minutes(1)), None);
        assert_eq!(plan(&checked_in, ScanMode::Toggle, now), Plan::CheckOut);

        let checked_out = make_registration(
            true,
            Some(now - Duration::hours(2)),
            Some(now - Duration::hours(1)),
        );
        assert_eq!(
            plan(&checked_out, ScanMode::Toggle, now),
            Plan::CheckIn { reentry: true }
        );
    }

    #[test]
    fn toggle_rescan_of_checked_in_checks_out_even_within_window() {
        // TOGGLE resolves to OUT whenever the state is IN; the duplicate
        // window only suppresses repeated IN requests.
        let now = Utc::now();
        let reg = make_registration(true, Some(now - Duration::seconds(1)), None);
        assert_eq!(plan(&reg, ScanMode::Toggle, now), Plan::CheckOut);
    }

    #[test]
    fn mutating_outcomes_are_flagged() {
        assert!(ScanOutcome::In.mutated());
        assert!(ScanOutcome::ReIn.mutated());
        assert!(ScanOutcome::Out.mutated());
        assert!(!ScanOutcome::Duplicate.mutated());
        assert!(!ScanOutcome::AlreadyIn.mutated());
        assert!(!ScanOutcome::NotIn.mutated());
    }
}
