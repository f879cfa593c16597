//! Teams, races, memberships and karts.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use pitwall_protocol::{
    Kart, KartId, Race, RaceId, RaceTeam, RaceTeamKey, Record, TableName, Team, TeamId,
};
use std::sync::Arc;

const DEFAULT_KART_STATUS: u8 = 1;

/// Writers for the rows the pit lane hangs off.
#[derive(Debug, Clone)]
pub struct Roster {
    db: Arc<Database>,
}

impl Roster {
    /// Creates a roster over `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Creates a team.
    pub fn create_team(&self, name: &str) -> CoreResult<Record<Team>> {
        let name = non_empty(name, "team name")?;
        self.db.transaction(|txn| Ok(txn.create(Team { name })))
    }

    /// Creates a race on `date` (`YYYY-MM-DD`).
    pub fn create_race(&self, name: &str, date: &str) -> CoreResult<Record<Race>> {
        let name = non_empty(name, "race name")?;
        check_date(date)?;
        self.db.transaction(|txn| {
            Ok(txn.create(Race {
                name,
                date: date.to_owned(),
            }))
        })
    }

    /// Soft-deletes a race and its memberships.
    pub fn delete_race(&self, race_id: RaceId) -> CoreResult<()> {
        self.db.transaction(|txn| {
            if txn.tombstone::<Race>(race_id).is_none() {
                return Err(race_not_found());
            }
            let members: Vec<RaceTeamKey> = txn
                .live_rows::<RaceTeam>()
                .filter(|(key, _)| key.race_id == race_id)
                .map(|(key, _)| key)
                .collect();
            for key in members {
                txn.tombstone::<RaceTeam>(key);
            }
            Ok(())
        })
    }

    /// Enters a team in a race, or changes its number.
    pub fn add_team_to_race(
        &self,
        race_id: RaceId,
        team_id: TeamId,
        number: Option<&str>,
    ) -> CoreResult<Record<RaceTeam>> {
        let number = number.map(str::trim).filter(|n| !n.is_empty()).map(str::to_owned);
        self.db.transaction(|txn| {
            if txn.live::<Race>(&race_id).is_none() {
                return Err(race_not_found());
            }
            if txn.live::<Team>(&team_id).is_none() {
                return Err(team_not_found());
            }
            let key = RaceTeamKey::new(race_id, team_id);
            if let Some(number) = &number {
                let taken = txn.live_rows::<RaceTeam>().any(|(other, membership)| {
                    other.race_id == race_id
                        && other != key
                        && membership.number.as_ref() == Some(number)
                });
                if taken {
                    return Err(CoreError::conflict("team number already used in this race"));
                }
            }
            Ok(txn.write(key, RaceTeam { number }))
        })
    }

    /// Withdraws a team from a race.
    pub fn remove_team_from_race(&self, race_id: RaceId, team_id: TeamId) -> CoreResult<()> {
        self.db.transaction(|txn| {
            txn.tombstone::<RaceTeam>(RaceTeamKey::new(race_id, team_id))
                .map(|_| ())
                .ok_or_else(|| {
                    CoreError::not_found(TableName::RaceTeams, "team is not entered in this race")
                })
        })
    }

    /// Creates a kart for a race.
    pub fn create_kart(
        &self,
        race_id: RaceId,
        status: Option<u8>,
        team_id: Option<TeamId>,
    ) -> CoreResult<Record<Kart>> {
        let status = status.unwrap_or(DEFAULT_KART_STATUS);
        check_status(status)?;
        self.db.transaction(|txn| {
            if txn.live::<Race>(&race_id).is_none() {
                return Err(race_not_found());
            }
            if let Some(team) = team_id {
                if txn.live::<Team>(&team).is_none() {
                    return Err(team_not_found());
                }
            }
            Ok(txn.create(Kart {
                race_id,
                status,
                team_id,
            }))
        })
    }

    /// Records the condition of a kart.
    pub fn set_kart_status(&self, kart_id: KartId, status: u8) -> CoreResult<Record<Kart>> {
        check_status(status)?;
        self.db.transaction(|txn| {
            let mut kart = txn.live::<Kart>(&kart_id).cloned().ok_or_else(kart_not_found)?;
            kart.status = status;
            Ok(txn.write(kart_id, kart))
        })
    }

    /// Hands a kart to a team, or takes it away with `None`.
    pub fn assign_kart(&self, kart_id: KartId, team_id: Option<TeamId>) -> CoreResult<Record<Kart>> {
        self.db.transaction(|txn| {
            let mut kart = txn.live::<Kart>(&kart_id).cloned().ok_or_else(kart_not_found)?;
            if let Some(team) = team_id {
                if txn.live::<Team>(&team).is_none() {
                    return Err(team_not_found());
                }
            }
            kart.team_id = team_id;
            Ok(txn.write(kart_id, kart))
        })
    }

    /// Live karts a team holds in a race.
    pub fn karts_for_team(&self, race_id: RaceId, team_id: TeamId) -> Vec<Record<Kart>> {
        self.db.read(|t| {
            t.scan::<Kart>()
                .filter(|r| {
                    r.body()
                        .is_some_and(|k| k.race_id == race_id && k.team_id == Some(team_id))
                })
                .cloned()
                .collect()
        })
    }

    /// Live memberships of a race.
    pub fn teams_in_race(&self, race_id: RaceId) -> Vec<Record<RaceTeam>> {
        self.db.read(|t| {
            t.scan::<RaceTeam>()
                .filter(|r| r.is_live() && r.key.race_id == race_id)
                .cloned()
                .collect()
        })
    }
}

fn race_not_found() -> CoreError {
    CoreError::not_found(TableName::Races, "race not found")
}

fn team_not_found() -> CoreError {
    CoreError::not_found(TableName::Teams, "team not found")
}

fn kart_not_found() -> CoreError {
    CoreError::not_found(TableName::Karts, "kart not found")
}

fn non_empty(value: &str, what: &str) -> CoreResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::validation(format!("{what} must not be empty")));
    }
    Ok(value.to_owned())
}

fn check_status(status: u8) -> CoreResult<()> {
    if !(1..=5).contains(&status) {
        return Err(CoreError::validation("kart status must be between 1 and 5"));
    }
    Ok(())
}

fn check_date(date: &str) -> CoreResult<()> {
    let parts: Vec<&str> = date.split('-').collect();
    let well_formed = matches!(parts.as_slice(), [y, m, d]
        if y.len() == 4 && m.len() == 2 && d.len() == 2
            && [y, m, d].iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())));
    if !well_formed {
        return Err(CoreError::validation("race date must be YYYY-MM-DD"));
    }
    Ok(())
}
