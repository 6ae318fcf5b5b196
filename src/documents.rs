use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::{DocType, Document};
use crate::workbook::{normalize_text, to_float, to_int, TableRow, WorkbookTables};

/// Ordered stage keyword table: earlier entries win. Free-text exam labels in
/// the workbook are Korean, so the keyword sets are too.
const STAGE_KEYWORDS: &[(&[&str], i64)] = &[
    (&["필기", "서류", "이론"], 1),
    (&["실기", "실습", "작업"], 2),
    (&["면접", "구술"], 3),
    (&["최종"], 4),
    (&["전체"], 10),
];

/// Sort key for rows whose stage could not be resolved; they land after every
/// recognized stage within the same year.
const UNRESOLVED_STAGE_SORT_KEY: i64 = 99;

#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub cert_id: String,
    pub name: String,
    pub overview: Option<String>,
    pub job_roles: Option<String>,
    pub exam_method: Option<String>,
    pub eligibility: Option<String>,
    pub rating: Option<String>,
    pub expected_duration: Option<String>,
    pub expected_duration_major: Option<String>,
    pub authority: Option<String>,
    pub cert_type: Option<String>,
    pub homepage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StatisticEntry {
    pub cert_id: String,
    pub exam_type: Option<String>,
    pub stage: Option<i64>,
    pub year: Option<String>,
    pub session: Option<String>,
    pub registered: Option<i64>,
    pub applicants: Option<i64>,
    pub passers: Option<i64>,
    pub pass_rate: Option<f64>,
}

/// Builds the full corpus: one profile document per certificate, immediately
/// followed by that certificate's statistics documents, most recent year first.
pub fn generate_documents(tables: &WorkbookTables) -> Vec<Document> {
    let rating_map = build_rating_map(&tables.rating);
    let certificates = build_certificates(&tables.certificate);
    let stats = build_statistics(&tables.statistics);

    let mut stats_by_cert = HashMap::<String, Vec<StatisticEntry>>::new();
    for entry in stats {
        stats_by_cert
            .entry(entry.cert_id.clone())
            .or_default()
            .push(entry);
    }

    let mut documents = Vec::<Document>::new();
    for cert in &certificates {
        documents.push(build_profile_document(cert, &rating_map));
        let entries = stats_by_cert.get(cert.cert_id.as_str());
        documents.extend(build_statistics_documents(
            cert,
            entries.map(Vec::as_slice).unwrap_or_default(),
        ));
    }
    documents
}

/// Maps a rating score to its description from the rating sheet; rows without
/// a score or a description contribute nothing a profile line could use.
pub fn build_rating_map(rows: &[TableRow]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for row in rows {
        let Some(score) = text_field(row, "rating") else {
            continue;
        };
        if let Some(description) = text_field(row, "description") {
            mapping.insert(score, description);
        }
    }
    mapping
}

/// Certificate rows keyed by id; the sheet's row order is preserved and a
/// duplicate id overwrites the earlier entry in place.
pub fn build_certificates(rows: &[TableRow]) -> Vec<CertificateInfo> {
    let mut certificates = Vec::<CertificateInfo>::new();
    let mut index_by_id = HashMap::<String, usize>::new();

    for row in rows {
        let Some(cert_id) = text_field(row, "id") else {
            continue;
        };
        let Some(name) = text_field(row, "name") else {
            continue;
        };

        let cert = CertificateInfo {
            cert_id: cert_id.clone(),
            name,
            overview: text_field(row, "overview"),
            job_roles: text_field(row, "job_roles"),
            exam_method: text_field(row, "exam_method"),
            eligibility: text_field(row, "eligibility"),
            rating: text_field(row, "rating"),
            expected_duration: text_field(row, "expected_duration"),
            expected_duration_major: text_field(row, "expected_duration_major"),
            authority: text_field(row, "authority"),
            cert_type: text_field(row, "type"),
            homepage: text_field(row, "homepage"),
        };

        match index_by_id.get(&cert_id) {
            Some(&position) => certificates[position] = cert,
            None => {
                index_by_id.insert(cert_id, certificates.len());
                certificates.push(cert);
            }
        }
    }

    certificates
}

pub fn build_statistics(rows: &[TableRow]) -> Vec<StatisticEntry> {
    let mut stats = Vec::<StatisticEntry>::new();
    for row in rows {
        let cert_id = text_field(row, "cert_id").or_else(|| text_field(row, "certificate_id"));
        let Some(cert_id) = cert_id else {
            continue;
        };

        let exam_type = text_field(row, "exam_type");
        let stage = normalize_stage(exam_type.as_deref());
        let registered = int_field(row, "registered").or_else(|| int_field(row, "registerd"));
        let applicants = int_field(row, "applicants");
        let passers = int_field(row, "passers");
        let pass_rate = resolve_pass_rate(
            row.get("pass_rate").and_then(to_float),
            passers,
            applicants,
            registered,
        );

        stats.push(StatisticEntry {
            cert_id,
            exam_type,
            stage,
            year: text_field(row, "year"),
            session: text_field(row, "session"),
            registered,
            applicants,
            passers,
            pass_rate,
        });
    }
    stats
}

/// Resolves a stored pass rate against one derivable from passers/base counts.
///
/// Workbooks are inconsistent about storing rates as 0-1 fractions versus
/// 0-100 percentages. A stored value <= 1 is treated as a fraction only when
/// the derived rate disagrees by exceeding 1; otherwise the stored value wins
/// untouched (legitimately sub-1% rates cannot be told apart here).
pub fn resolve_pass_rate(
    stored: Option<f64>,
    passers: Option<i64>,
    applicants: Option<i64>,
    registered: Option<i64>,
) -> Option<f64> {
    let base_total = match applicants {
        Some(count) if count != 0 => Some(count),
        _ => registered,
    };

    let derived = match (passers, base_total) {
        (Some(passed), Some(base)) if passed != 0 && base != 0 => {
            Some(round1(passed as f64 / base as f64 * 100.0))
        }
        _ => None,
    };

    match stored {
        None => derived,
        Some(raw) => {
            let rounded = round1(raw);
            match derived {
                Some(corrected) if rounded <= 1.0 && corrected > 1.0 => Some(corrected),
                _ => Some(rounded),
            }
        }
    }
}

/// Maps a free-text exam label to a normalized stage ordinal.
///
/// Priority: whole-value numeric parse, then the first embedded digit run,
/// then the keyword table. Anything unresolved stays None and sorts last.
pub fn normalize_stage(exam_type: Option<&str>) -> Option<i64> {
    let text = exam_type?.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(value) = text.parse::<f64>() {
        if value.is_finite() {
            return Some(value.trunc() as i64);
        }
    }

    if let Some(found) = digit_run_pattern().find(text) {
        if let Ok(value) = found.as_str().parse::<i64>() {
            return Some(value);
        }
    }

    let lowered = text.to_lowercase();
    for (keywords, stage) in STAGE_KEYWORDS {
        if keywords.iter().any(|keyword| lowered.contains(keyword)) {
            return Some(*stage);
        }
    }

    None
}

pub fn build_profile_document(
    cert: &CertificateInfo,
    rating_map: &HashMap<String, String>,
) -> Document {
    let mut lines = Vec::<String>::new();
    lines.push(format!("{} 자격증 정보", cert.name));
    lines.push(String::new());

    if let Some(rating) = &cert.rating {
        let mut rating_text = format!("난이도 {rating}");
        if let Some(description) = rating_map.get(rating.as_str()) {
            rating_text.push_str(" - ");
            rating_text.push_str(description);
        }
        lines.push(rating_text);
    }

    let labeled = [
        ("개요", &cert.overview),
        ("활용 직무", &cert.job_roles),
        ("시험 방식", &cert.exam_method),
        ("응시 자격", &cert.eligibility),
        ("예상 취득 기간(전공자)", &cert.expected_duration),
        ("예상 취득 기간(비전공자)", &cert.expected_duration_major),
        ("시행 기관", &cert.authority),
        ("자격증 유형", &cert.cert_type),
        ("공식 홈페이지", &cert.homepage),
    ];
    for (label, value) in labeled {
        if let Some(value) = value {
            lines.push(format!("{label}: {value}"));
        }
    }

    if lines.len() == 2 {
        lines.push("추가 정보가 제공되지 않았습니다.".to_string());
    }

    Document {
        id: format!("certificate_profile:{}", cert.cert_id),
        certificate_id: cert.cert_id.clone(),
        doc_type: DocType::Profile,
        name: cert.name.clone(),
        year: None,
        text: lines.join("\n").trim().to_string(),
    }
}

/// One document per statistics year, newest year first; rows within a year are
/// ordered by resolved stage, unresolved stages last.
pub fn build_statistics_documents(
    cert: &CertificateInfo,
    entries: &[StatisticEntry],
) -> Vec<Document> {
    let mut grouped = Vec::<(Option<String>, Vec<&StatisticEntry>)>::new();
    for entry in entries {
        match grouped.iter_mut().find(|(year, _)| *year == entry.year) {
            Some((_, bucket)) => bucket.push(entry),
            None => grouped.push((entry.year.clone(), vec![entry])),
        }
    }
    grouped.sort_by(|a, b| {
        let left = a.0.clone().unwrap_or_default();
        let right = b.0.clone().unwrap_or_default();
        right.cmp(&left)
    });

    let mut documents = Vec::<Document>::new();
    for (year, mut year_entries) in grouped {
        year_entries.sort_by(|a, b| {
            let left = (
                a.stage.unwrap_or(UNRESOLVED_STAGE_SORT_KEY),
                a.exam_type.clone().unwrap_or_default(),
            );
            let right = (
                b.stage.unwrap_or(UNRESOLVED_STAGE_SORT_KEY),
                b.exam_type.clone().unwrap_or_default(),
            );
            left.cmp(&right)
        });

        let mut lines = Vec::<String>::new();
        lines.push(format!("{} 통계 요약 - {}", cert.name, format_year(year.as_deref())));
        lines.push(String::new());

        for entry in year_entries {
            lines.push(format_statistics_line(entry));
        }

        documents.push(Document {
            id: format!(
                "certificate_stats:{}:{}",
                cert.cert_id,
                year.as_deref().unwrap_or("unknown")
            ),
            certificate_id: cert.cert_id.clone(),
            doc_type: DocType::Statistics,
            name: cert.name.clone(),
            year: year.clone(),
            text: lines.join("\n").trim().to_string(),
        });
    }

    documents
}

fn format_statistics_line(entry: &StatisticEntry) -> String {
    let stage_label = format_stage_label(entry.stage, entry.exam_type.as_deref());
    let mut parts = Vec::<String>::new();

    let nonzero_registered = entry.registered.filter(|count| *count != 0);
    if let Some(applicants) = entry.applicants {
        parts.push(format!("응시자 {}명", format_number(applicants)));
    } else if let Some(registered) = nonzero_registered {
        parts.push(format!("접수자 {}명", format_number(registered)));
    }

    if let Some(passers) = entry.passers {
        parts.push(format!("합격자 {}명", format_number(passers)));
    }

    let mut pass_rate = entry.pass_rate;
    if pass_rate.is_none() {
        if let Some(passers) = entry.passers {
            let base = match entry.applicants {
                Some(count) if count != 0 => Some(count),
                _ => entry.registered,
            };
            match base {
                Some(base) if base != 0 => {
                    pass_rate = Some(round1(passers as f64 / base as f64 * 100.0));
                }
                Some(_) => pass_rate = Some(0.0),
                None => {}
            }
        }
    }
    if let Some(rate) = pass_rate {
        parts.push(format!("합격률 {}", format_percentage(rate)));
    }

    if let Some(session) = &entry.session {
        parts.push(format!("시행 {session}회"));
    }

    if parts.is_empty() {
        parts.push("수치 정보 없음".to_string());
    }

    format!("- {stage_label}: {}", parts.join(", "))
}

fn format_stage_label(stage: Option<i64>, exam_type: Option<&str>) -> String {
    if stage == Some(10) {
        return "전체".to_string();
    }
    if let Some(text) = exam_type.map(str::trim).filter(|text| !text.is_empty()) {
        return text.to_string();
    }
    match stage {
        Some(value) => format!("{value}차"),
        None => "차수 미상".to_string(),
    }
}

fn format_year(year: Option<&str>) -> String {
    let Some(value) = year.map(str::trim).filter(|text| !text.is_empty()) else {
        return "연도 미상".to_string();
    };
    if value.chars().all(|ch| ch.is_ascii_digit()) {
        format!("{value}년")
    } else {
        value.to_string()
    }
}

/// Thousands-separated decimal rendering, e.g. 15234 -> "15,234".
fn format_number(value: i64) -> String {
    let digits = value.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (position, ch) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn format_percentage(value: f64) -> String {
    format!("{value:.1}%")
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn text_field(row: &TableRow, key: &str) -> Option<String> {
    row.get(key).and_then(normalize_text)
}

fn int_field(row: &TableRow, key: &str) -> Option<i64> {
    row.get(key).and_then(to_int)
}

fn digit_run_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("digit pattern is valid"))
}
