//! Incident severity scoring.

use std::collections::BTreeSet;

use crate::domain::{Assessment, Incident, IncidentType, SeverityLevel};

/// Weight of a corruption incident.
pub const WEIGHT_CORRUPTION: u32 = 5;
/// Weight of a data-loss incident.
pub const WEIGHT_DATA_LOSS: u32 = 5;
/// Weight of a security breach.
pub const WEIGHT_SECURITY_BREACH: u32 = 6;
/// Weight of a hardware failure.
pub const WEIGHT_HARDWARE_FAILURE: u32 = 4;
/// Weight of a performance degradation.
pub const WEIGHT_PERFORMANCE_DEGRADATION: u32 = 2;
/// Added per affected critical table.
pub const WEIGHT_PER_CRITICAL_TABLE: u32 = 3;

/// `(records lost above, points)`, checked in order.
pub const RECORDS_LOST_BANDS: [(u64, u32); 3] = [(1000, 5), (100, 3), (0, 1)];
/// `(downtime ms above, points)`, checked in order.
pub const DOWNTIME_BANDS: [(u64, u32); 3] = [(300_000, 5), (60_000, 3), (0, 1)];

/// Minimum score for [`SeverityLevel::Critical`].
pub const CRITICAL_THRESHOLD: u32 = 15;
/// Minimum score for [`SeverityLevel::High`].
pub const HIGH_THRESHOLD: u32 = 10;
/// Minimum score for [`SeverityLevel::Medium`].
pub const MEDIUM_THRESHOLD: u32 = 5;

/// Base weight of an incident type.
#[must_use]
pub const fn type_weight(incident_type: IncidentType) -> u32 {
    match incident_type {
        IncidentType::Corruption => WEIGHT_CORRUPTION,
        IncidentType::DataLoss => WEIGHT_DATA_LOSS,
        IncidentType::SecurityBreach => WEIGHT_SECURITY_BREACH,
        IncidentType::HardwareFailure => WEIGHT_HARDWARE_FAILURE,
        IncidentType::PerformanceDegradation => WEIGHT_PERFORMANCE_DEGRADATION,
    }
}

/// Level for a score.
#[must_use]
pub const fn level_for(score: u32) -> SeverityLevel {
    if score >= CRITICAL_THRESHOLD {
        SeverityLevel::Critical
    } else if score >= HIGH_THRESHOLD {
        SeverityLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    }
}

fn band(value: u64, bands: &[(u64, u32)]) -> u32 {
    bands
        .iter()
        .find(|(above, _)| value > *above)
        .map_or(0, |(_, points)| *points)
}

/// Scores an incident. Pure and additive: more affected critical tables,
/// more lost records or more downtime never lower the score.
#[must_use]
pub fn assess_emergency_level(incident: &Incident, critical_tables: &[String]) -> Assessment {
    let mut reasoning = Vec::new();

    let base = type_weight(incident.incident_type);
    reasoning.push(format!("{} incident: +{base}", incident.incident_type));
    let mut score = base;

    let critical: BTreeSet<&String> = incident
        .affected_tables
        .iter()
        .filter(|t| critical_tables.contains(*t))
        .collect();
    if !critical.is_empty() {
        let points = WEIGHT_PER_CRITICAL_TABLE.saturating_mul(u32::try_from(critical.len()).unwrap_or(u32::MAX));
        reasoning.push(format!(
            "{} critical table(s) affected ({}): +{points}",
            critical.len(),
            critical
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        score = score.saturating_add(points);
    }

    let lost = band(incident.records_lost, &RECORDS_LOST_BANDS);
    if lost > 0 {
        reasoning.push(format!("{} records lost: +{lost}", incident.records_lost));
        score = score.saturating_add(lost);
    }

    let down = band(incident.downtime_ms, &DOWNTIME_BANDS);
    if down > 0 {
        reasoning.push(format!("{} ms downtime: +{down}", incident.downtime_ms));
        score = score.saturating_add(down);
    }

    let level = level_for(score);
    reasoning.push(format!("score {score} => {level}"));
    Assessment {
        level,
        score,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn critical() -> Vec<String> {
        ["alanlar", "ogretmenler", "isletmeler", "ogrenciler", "stajlar"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn data_loss_on_critical_table_is_critical() {
        let incident = Incident::new(IncidentType::DataLoss)
            .with_tables(["ogretmenler"])
            .with_records_lost(1500)
            .with_downtime_ms(400_000);
        let assessment = assess_emergency_level(&incident, &critical());
        assert_eq!(assessment.score, 18);
        assert_eq!(assessment.level, SeverityLevel::Critical);
        assert_eq!(assessment.reasoning.len(), 5);
    }

    #[test]
    fn bare_performance_incident_is_low() {
        let incident = Incident::new(IncidentType::PerformanceDegradation);
        let assessment = assess_emergency_level(&incident, &critical());
        assert_eq!(assessment.score, 2);
        assert_eq!(assessment.level, SeverityLevel::Low);
    }

    #[test]
    fn non_critical_tables_do_not_score() {
        let incident = Incident::new(IncidentType::Corruption).with_tables(["belgeler"]);
        assert_eq!(assess_emergency_level(&incident, &critical()).score, 5);
    }

    #[test]
    fn repeated_critical_table_scores_once() {
        let once = Incident::new(IncidentType::DataLoss).with_tables(["ogrenciler"]);
        let twice = Incident::new(IncidentType::DataLoss).with_tables(["ogrenciler", "ogrenciler"]);
        assert_eq!(
            assess_emergency_level(&twice, &critical()).score,
            assess_emergency_level(&once, &critical()).score
        );
        assert_eq!(assess_emergency_level(&twice, &critical()).score, 8);
    }

    #[test]
    fn bands_use_strict_thresholds() {
        assert_eq!(band(1000, &RECORDS_LOST_BANDS), 3);
        assert_eq!(band(1001, &RECORDS_LOST_BANDS), 5);
        assert_eq!(band(0, &RECORDS_LOST_BANDS), 0);
        assert_eq!(band(60_000, &DOWNTIME_BANDS), 1);
        assert_eq!(band(60_001, &DOWNTIME_BANDS), 3);
    }

    #[test]
    fn score_is_monotonic_in_every_input() {
        let tables = critical();
        for kind in IncidentType::ALL {
            let mut previous = 0;
            for (n_tables, lost, down) in [
                (0, 0, 0),
                (1, 0, 0),
                (1, 50, 0),
                (2, 50, 10),
                (2, 500, 10),
                (3, 500, 90_000),
                (3, 5_000, 90_000),
                (5, 5_000, 600_000),
            ] {
                let incident = Incident::new(kind)
                    .with_tables(tables.iter().take(n_tables).cloned())
                    .with_records_lost(lost)
                    .with_downtime_ms(down);
                let assessment = assess_emergency_level(&incident, &tables);
                assert!(assessment.score >= previous);
                assert_eq!(assessment.level, level_for(assessment.score));
                previous = assessment.score;
            }
        }
    }

    #[test]
    fn levels_follow_thresholds() {
        assert_eq!(level_for(4), SeverityLevel::Low);
        assert_eq!(level_for(5), SeverityLevel::Medium);
        assert_eq!(level_for(10), SeverityLevel::High);
        assert_eq!(level_for(15), SeverityLevel::Critical);
    }
}
