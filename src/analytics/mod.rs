//! Analytics over a user's prompt history

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::prompts::PromptRecord;

const TOP_TAGS: usize = 20;
const DAILY_USAGE_DAYS: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorePoint {
    pub date: String,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedCount {
    pub name: String,
    pub value: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyCount {
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Improvement {
    pub iteration: usize,
    pub score: u32,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_prompts: usize,
    pub avg_score: u32,
    pub score_over_time: Vec<ScorePoint>,
    pub model_usage: Vec<NamedCount>,
    pub mode_usage: Vec<NamedCount>,
    pub tag_frequency: Vec<NamedCount>,
    pub daily_usage: Vec<DailyCount>,
    pub activity_data: BTreeMap<String, usize>,
    pub improvements: Vec<Improvement>,
    pub insights: Vec<String>,
}

fn short_date(date: NaiveDate) -> String {
    date.format("%b %d").to_string()
}

fn average(scores: &[u32]) -> u32 {
    if scores.is_empty() {
        return 0;
    }
    let sum: u64 = scores.iter().map(|s| *s as u64).sum();
    (sum as f64 / scores.len() as f64).round() as u32
}

/// Counts sorted by value descending, ties by name
fn ranked(counts: HashMap<String, usize>) -> Vec<NamedCount> {
    let mut ranked: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, value)| NamedCount { name, value })
        .collect();
    ranked.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
    ranked
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn summarize(records: &[PromptRecord]) -> AnalyticsSummary {
    if records.is_empty() {
        return AnalyticsSummary {
            total_prompts: 0,
            avg_score: 0,
            score_over_time: Vec::new(),
            model_usage: Vec::new(),
            mode_usage: Vec::new(),
            tag_frequency: Vec::new(),
            daily_usage: Vec::new(),
            activity_data: BTreeMap::new(),
            improvements: Vec::new(),
            insights: vec!["Start creating prompts to see analytics!".to_string()],
        };
    }

    let mut records: Vec<&PromptRecord> = records.iter().collect();
    records.sort_by_key(|r| r.created_at);

    let scores: Vec<u32> = records.iter().map(|r| r.benchmark_score).collect();
    let avg_score = average(&scores);

    let mut by_day: BTreeMap<NaiveDate, Vec<u32>> = BTreeMap::new();
    for record in &records {
        by_day
            .entry(record.created_at.date_naive())
            .or_default()
            .push(record.benchmark_score);
    }

    let score_over_time = by_day
        .iter()
        .map(|(date, scores)| ScorePoint {
            date: short_date(*date),
            score: average(scores),
        })
        .collect();

    let daily: Vec<DailyCount> = by_day
        .iter()
        .map(|(date, scores)| DailyCount {
            date: short_date(*date),
            count: scores.len(),
        })
        .collect();
    let daily_usage = daily[daily.len().saturating_sub(DAILY_USAGE_DAYS)..].to_vec();

    let activity_data = by_day
        .iter()
        .map(|(date, scores)| (date.format("%Y-%m-%d").to_string(), scores.len()))
        .collect();

    let mut models: HashMap<String, usize> = HashMap::new();
    let mut modes: HashMap<String, usize> = HashMap::new();
    let mut tags: HashMap<String, usize> = HashMap::new();
    for record in &records {
        let model = record
            .model
            .as_deref()
            .map(|m| m.rsplit('/').next().unwrap_or(m))
            .filter(|m| !m.is_empty())
            .unwrap_or("Unknown");
        *models.entry(model.to_string()).or_default() += 1;

        let mode = if record.mode.is_empty() {
            "standard"
        } else {
            record.mode.as_str()
        };
        *modes.entry(capitalize(mode)).or_default() += 1;

        for tag in &record.tags {
            *tags.entry(tag.clone()).or_default() += 1;
        }
    }

    let model_usage = ranked(models);
    let mut tag_frequency = ranked(tags);
    tag_frequency.truncate(TOP_TAGS);

    let improvements = records
        .iter()
        .enumerate()
        .map(|(i, r)| Improvement {
            iteration: i + 1,
            score: r.benchmark_score,
            date: short_date(r.created_at.date_naive()),
        })
        .collect();

    let mut insights = vec![if avg_score >= 85 {
        "Excellent! Your prompts consistently achieve high scores.".to_string()
    } else if avg_score >= 70 {
        "Good progress! Try Ultra Mode for even better results.".to_string()
    } else {
        "Tip: Be more specific and provide context in your prompts.".to_string()
    }];
    if let Some(top) = model_usage.first() {
        insights.push(format!("Your most-used model is {}", top.name));
    }

    AnalyticsSummary {
        total_prompts: records.len(),
        avg_score,
        score_over_time,
        model_usage,
        mode_usage: ranked(modes),
        tag_frequency,
        daily_usage,
        activity_data,
        improvements,
        insights,
    }
}
