//! Semantic tags derived from a notice

use super::{is_named, NoticeType, VoEvent};

const CONCEPT_GRB: &str = "process.variation.burst;em.gamma";
const CONCEPT_TRANSIENT: &str = "process.variation.trans;em.gamma";

/// Derive the ordered, de-duplicated tag list for a notice
pub fn classify(event: &VoEvent<'_>, stream: &str, notice_type: NoticeType) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    push(stream.to_string());

    match event.text_at(&["Why", "Inference", "Concept"]) {
        Some(CONCEPT_GRB) => push("GRB".to_string()),
        Some(CONCEPT_TRANSIENT) => push("transient".to_string()),
        _ => {}
    }

    // LVC alerts never populate Why/Inference/Concept
    if notice_type.is_gravitational_wave() {
        push("GW".to_string());
    }

    match notice_type {
        NoticeType::IcecubeAstrotrackGold => {
            push("Neutrino".to_string());
            push("IceCube".to_string());
            push("Gold".to_string());
        }
        NoticeType::IcecubeAstrotrackBronze => {
            push("Neutrino".to_string());
            push("IceCube".to_string());
            push("Bronze".to_string());
        }
        NoticeType::LvcRetraction => push("retracted".to_string()),
        _ => {}
    }

    // Swift and Fermi GBM use different parameter names for the same thing
    for name in ["Long_short", "Duration_class"] {
        if let Some(value) = event.param_value(name) {
            if value != "unknown" {
                push(value.to_lowercase());
            }
        }
    }

    if let Some(name) = top_classification(event) {
        push(name);
    }

    if let Some(search) = event.what_param_value("Search") {
        push(search.to_string());
    }

    tags
}

/// Name of the highest-valued `Classification` param; first wins on ties
fn top_classification(event: &VoEvent<'_>) -> Option<String> {
    let mut best: Option<(f64, &str)> = None;

    for group in event.groups("Classification") {
        for param in group.children().filter(|n| is_named(*n, "Param")) {
            let (Some(name), Some(value)) = (param.attribute("name"), param.attribute("value"))
            else {
                continue;
            };
            let Ok(value) = value.trim().parse::<f64>() else {
                continue;
            };
            match best {
                Some((current, _)) if value > current => best = Some((value, name)),
                None => best = Some((value, name)),
                _ => {}
            }
        }
    }

    best.map(|(_, name)| name.to_string())
}
