// src/models/report.rs

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::PASS_THRESHOLD_PERCENTAGE;

/// Active station on one of the session's paths, with its checklist total.
#[derive(Debug, Clone, FromRow)]
pub struct ReportStation {
    pub id: Uuid,
    pub path_id: Uuid,
    pub path_name: String,
    pub station_number: i32,
    pub name: String,
    pub max_score: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReportStudent {
    pub id: Uuid,
    pub student_number: String,
    pub full_name: String,
    pub path_id: Option<Uuid>,
    pub path_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationHeader {
    pub number: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentResult {
    pub id: Uuid,
    pub student_number: String,
    pub full_name: String,
    pub path_name: Option<String>,
    /// Final score per station number; `None` when not yet reconciled.
    pub station_scores: BTreeMap<i32, Option<f64>>,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub session_name: String,
    pub total_students: usize,
    pub completed_students: usize,
    pub average_percentage: f64,
    pub pass_rate: f64,
    pub station_headers: Vec<StationHeader>,
    pub students: Vec<StudentResult>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Station numbers across all paths, each listed once under the first name seen.
pub fn station_headers(stations: &[ReportStation]) -> Vec<StationHeader> {
    let mut headers: BTreeMap<i32, String> = BTreeMap::new();
    for station in stations {
        headers
            .entry(station.station_number)
            .or_insert_with(|| station.name.clone());
    }
    headers
        .into_iter()
        .map(|(number, name)| StationHeader { number, name })
        .collect()
}

/// Scores every student against the stations of their own path.
///
/// `finals` maps (student id, station id) to the reconciled final score.
/// Students come back sorted by name.
pub fn student_results(
    stations: &[ReportStation],
    students: &[ReportStudent],
    finals: &HashMap<(Uuid, Uuid), f64>,
) -> Vec<StudentResult> {
    let headers = station_headers(stations);
    let by_path: HashMap<(Uuid, i32), &ReportStation> = stations
        .iter()
        .map(|s| ((s.path_id, s.station_number), s))
        .collect();

    let mut results: Vec<StudentResult> = students
        .iter()
        .map(|student| {
            let mut station_scores = BTreeMap::new();
            let mut total_score = 0.0;
            let mut max_score = 0.0;

            for header in &headers {
                let station = student
                    .path_id
                    .and_then(|path| by_path.get(&(path, header.number)));
                let score = station.and_then(|station| {
                    max_score += station.max_score;
                    finals.get(&(student.id, station.id)).copied()
                });
                if let Some(score) = score {
                    total_score += score;
                }
                station_scores.insert(header.number, score);
            }

            let percentage = if max_score > 0.0 {
                total_score / max_score * 100.0
            } else {
                0.0
            };

            StudentResult {
                id: student.id,
                student_number: student.student_number.clone(),
                full_name: student.full_name.clone(),
                path_name: student.path_name.clone(),
                station_scores,
                total_score: round1(total_score),
                max_score: round1(max_score),
                percentage: round1(percentage),
                passed: percentage >= PASS_THRESHOLD_PERCENTAGE,
            }
        })
        .collect();

    results.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    results
}

/// Builds the session summary. Students without any scorable station
/// are left out of the average and the pass rate.
pub fn summarize(
    session_id: Uuid,
    session_name: &str,
    stations: &[ReportStation],
    students: &[ReportStudent],
    finals: &HashMap<(Uuid, Uuid), f64>,
) -> SessionSummary {
    let results = student_results(stations, students, finals);

    let counted: Vec<&StudentResult> = results
        .iter()
        .filter(|r| r.total_score > 0.0 || r.max_score > 0.0)
        .collect();
    let completed_students = counted.len();
    let (average_percentage, pass_rate) = if completed_students > 0 {
        let total: f64 = counted.iter().map(|r| r.percentage).sum();
        let passed = counted.iter().filter(|r| r.passed).count();
        (
            round1(total / completed_students as f64),
            round1(passed as f64 / completed_students as f64 * 100.0),
        )
    } else {
        (0.0, 0.0)
    };

    SessionSummary {
        session_id,
        session_name: session_name.to_string(),
        total_students: students.len(),
        completed_students,
        average_percentage,
        pass_rate,
        station_headers: station_headers(stations),
        students: results,
    }
}

/// Per-station aggregate over every examiner's submitted total.
#[derive(Debug, Clone, FromRow)]
pub struct StationTotals {
    pub station_name: String,
    pub path_name: String,
    pub avg_max: f64,
    pub avg_score: f64,
    pub min_score: f64,
    pub max_achieved: f64,
    pub marked: i64,
}

impl StationTotals {
    pub fn average_percentage(&self) -> f64 {
        if self.avg_max > 0.0 {
            round1(self.avg_score / self.avg_max * 100.0)
        } else {
            0.0
        }
    }
}
