// MatchAlgorithm: pure scoring + group-selection over enriched requests.
// No I/O, no errors -- callers guard against empty inputs (spec §4.2).

use uuid::Uuid;

use crate::domain::criteria::{LanguagePreference, RegionPreference, SkillPreference};
use crate::domain::match_request::MatchRequest;
use crate::domain::user::User;

pub const BASE_ACCEPTANCE_THRESHOLD: f64 = 0.55;
pub const ACCEPTANCE_THRESHOLD_FLOOR: f64 = 0.35;
pub const ACCEPTANCE_STEP_PER_RELAXATION: f64 = 0.05;
pub const DEFAULT_MIN_GROUP_SIZE: usize = 2;
const BASE_SKILL_TOLERANCE: f64 = 10.0;
const QUEUE_AGE_BONUS_CAP_MS: f64 = 300_000.0;

#[derive(Debug, Clone)]
pub struct EnrichedRequest {
    pub request: MatchRequest,
    pub user: User,
}

impl EnrichedRequest {
    pub fn new(request: MatchRequest, user: User) -> Self {
        Self { request, user }
    }
}

// threshold(relaxationMax): acceptance floor lowers 0.05 per relaxation
// step, bottoming out at 0.35.
pub fn acceptance_threshold(max_relaxation: u8) -> f64 {
    let lowered = BASE_ACCEPTANCE_THRESHOLD - ACCEPTANCE_STEP_PER_RELAXATION * max_relaxation as f64;
    lowered.max(ACCEPTANCE_THRESHOLD_FLOOR)
}

fn region_score(a: &EnrichedRequest, b: &EnrichedRequest) -> f64 {
    if a.request.criteria.regions_intersect(&b.request.criteria) {
        return 1.0;
    }
    // Use the stricter of the two stated preferences.
    let strict = matches!(a.request.criteria.region_preference, RegionPreference::Strict)
        || matches!(b.request.criteria.region_preference, RegionPreference::Strict);
    let preferred = matches!(a.request.criteria.region_preference, RegionPreference::Preferred)
        || matches!(b.request.criteria.region_preference, RegionPreference::Preferred);
    if strict {
        0.0
    } else if preferred {
        0.3
    } else {
        0.5
    }
}

fn language_score(a: &EnrichedRequest, b: &EnrichedRequest) -> f64 {
    if a.request.criteria.languages_intersect(&b.request.criteria) {
        return 1.0;
    }
    let strict = matches!(a.request.criteria.language_preference, LanguagePreference::Strict)
        || matches!(b.request.criteria.language_preference, LanguagePreference::Strict);
    let preferred = matches!(a.request.criteria.language_preference, LanguagePreference::Preferred)
        || matches!(b.request.criteria.language_preference, LanguagePreference::Preferred);
    if strict {
        0.0
    } else if preferred {
        0.3
    } else {
        0.5
    }
}

fn skill_score(a: &EnrichedRequest, b: &EnrichedRequest) -> f64 {
    let any_pref = matches!(a.request.criteria.skill_preference, SkillPreference::Any)
        || matches!(b.request.criteria.skill_preference, SkillPreference::Any);
    if any_pref {
        return 1.0;
    }

    let Some(primary_game) = a.request.criteria.primary_game() else {
        return 0.5;
    };
    let skill_a = a.user.profile_for(primary_game).map(|p| p.skill_level as f64);
    let skill_b = b.user.profile_for(primary_game).map(|p| p.skill_level as f64);
    let (Some(sa), Some(sb)) = (skill_a, skill_b) else {
        return 0.5;
    };

    let delta = (sa - sb).abs();
    let effective_tolerance = BASE_SKILL_TOLERANCE
        + 5.0 * a.request.relaxation_level.max(b.request.relaxation_level) as f64;
    (1.0 - delta / effective_tolerance).max(0.0)
}

fn group_size_score(a: &EnrichedRequest, b: &EnrichedRequest) -> f64 {
    if a.request.criteria.group_size.overlaps(&b.request.criteria.group_size) {
        1.0
    } else {
        0.0
    }
}

fn preselected_score(a: &EnrichedRequest, b: &EnrichedRequest) -> f64 {
    let mutual = a.request.preselected_users.contains(&b.request.user_id)
        && b.request.preselected_users.contains(&a.request.user_id);
    if mutual {
        0.15
    } else {
        0.0
    }
}

fn queue_age_bonus(a: &EnrichedRequest, b: &EnrichedRequest, now: u64) -> f64 {
    let oldest_duration = a
        .request
        .search_duration(now)
        .max(b.request.search_duration(now)) as f64;
    (oldest_duration / QUEUE_AGE_BONUS_CAP_MS).min(1.0) * 0.10
}

// Weighted compatibility score in [0,1] between a pair of enriched
// requests, w.r.t. the primary game. Hard-gates on differing game modes.
pub fn compatibility_score(a: &EnrichedRequest, b: &EnrichedRequest, now: u64) -> f64 {
    if a.request.criteria.game_mode != b.request.criteria.game_mode {
        return 0.0;
    }

    let mut total = 0.0;
    total += region_score(a, b) * 0.20;
    total += language_score(a, b) * 0.15;
    total += skill_score(a, b) * 0.30;
    total += group_size_score(a, b) * 0.10;
    total += preselected_score(a, b);
    total += queue_age_bonus(a, b, now);
    total
}

// Mean pairwise compatibility of `candidate` against every existing member.
fn mean_compat_with_group(candidate: &EnrichedRequest, group: &[EnrichedRequest], now: u64) -> f64 {
    if group.is_empty() {
        return 1.0;
    }
    let sum: f64 = group.iter().map(|m| compatibility_score(candidate, m, now)).collect::<Vec<_>>().iter().sum();
    sum / group.len() as f64
}

fn all_pairs_above(group: &[EnrichedRequest], threshold: f64, now: u64) -> bool {
    for i in 0..group.len() {
        for j in (i + 1)..group.len() {
            if compatibility_score(&group[i], &group[j], now) < threshold {
                return false;
            }
        }
    }
    true
}

fn group_max_size(group: &[EnrichedRequest]) -> u32 {
    group
        .iter()
        .map(|m| m.request.criteria.group_size.max)
        .min()
        .unwrap_or(u32::MAX)
}

fn group_min_size(group: &[EnrichedRequest]) -> u32 {
    group
        .iter()
        .map(|m| m.request.criteria.group_size.min)
        .max()
        .unwrap_or(DEFAULT_MIN_GROUP_SIZE as u32)
}

#[derive(Debug, Clone)]
pub struct FormedGroup {
    pub members: Vec<EnrichedRequest>,
}

// Greedy group selection, per spec §4.2. Scans from the oldest request
// (FIFO `bucket` order assumed), seeds a group, and greedily appends the
// best-fit remaining peer until no further peer can be added, then resumes
// scanning the remaining unused requests for the next group.
pub fn select_groups(
    bucket: &[EnrichedRequest],
    max_relaxation_in_bucket: u8,
    now: u64,
    min_group_size: usize,
) -> Vec<FormedGroup> {
    let threshold = acceptance_threshold(max_relaxation_in_bucket);
    let mut used = vec![false; bucket.len()];
    let mut groups = Vec::new();

    for seed_idx in 0..bucket.len() {
        if used[seed_idx] {
            continue;
        }

        let mut group: Vec<EnrichedRequest> = vec![bucket[seed_idx].clone()];
        let mut group_idx = vec![seed_idx];
        used[seed_idx] = true;

        loop {
            let max_size = group_max_size(&group);
            if group.len() as u32 >= max_size {
                break;
            }

            // Find the unused candidate with highest mean compatibility to
            // the current group, subject to all-pairs-above-threshold.
            let mut best: Option<(usize, f64)> = None;
            for (idx, candidate) in bucket.iter().enumerate() {
                if used[idx] {
                    continue;
                }
                if group.iter().any(|m| m.request.user_id == candidate.request.user_id) {
                    continue;
                }
                let mut trial = group.clone();
                trial.push(candidate.clone());
                if !all_pairs_above(&trial, threshold, now) {
                    continue;
                }
                let mean = mean_compat_with_group(candidate, &group, now);
                let better = match best {
                    None => true,
                    Some((best_idx, best_mean)) => {
                        mean > best_mean
                            || (mean == best_mean && tie_break(&bucket[best_idx], candidate))
                    }
                };
                if better {
                    best = Some((idx, mean));
                }
            }

            match best {
                Some((idx, _)) => {
                    used[idx] = true;
                    group_idx.push(idx);
                    group.push(bucket[idx].clone());
                }
                None => break,
            }
        }

        let min_required = group_min_size(&group).max(min_group_size as u32) as usize;
        if group.len() >= min_required {
            groups.push(FormedGroup { members: group });
        } else {
            // Not enough members yet; release candidates back to the pool
            // so later seeds may pick them up.
            for idx in group_idx {
                used[idx] = false;
            }
            used[seed_idx] = true;
        }
    }

    groups
}

// Ties break by earlier searchStartTime, then lower userId.
fn tie_break(current_best: &EnrichedRequest, candidate: &EnrichedRequest) -> bool {
    match candidate
        .request
        .search_start_time
        .cmp(&current_best.request.search_start_time)
    {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Equal => candidate.request.user_id < current_best.request.user_id,
        std::cmp::Ordering::Greater => false,
    }
}

// Independent of group selection: advances relaxation for a single request
// older than 30s. Returns `Some(new_level)` when the level changed.
pub fn apply_criteria_relaxation(request: &MatchRequest, now: u64) -> Option<u8> {
    let duration = request.search_duration(now);
    if duration < crate::domain::match_request::RELAXATION_STEP_MS {
        return None;
    }
    let new_level = MatchRequest::relaxation_for_duration(duration);
    if new_level == request.relaxation_level {
        None
    } else {
        Some(new_level)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchQualityScore {
    pub region: f64,
    pub language: f64,
    pub skill_balance: f64,
    pub overall: f64,
}

// Per-formed-group quality score: averages of pairwise region/language
// scores and a skill-balance metric, per spec §4.2.
pub fn match_quality(group: &[EnrichedRequest], primary_game: Uuid, now: u64) -> MatchQualityScore {
    let mut region_sum = 0.0;
    let mut language_sum = 0.0;
    let mut pairs = 0usize;
    for i in 0..group.len() {
        for j in (i + 1)..group.len() {
            region_sum += region_score(&group[i], &group[j]);
            language_sum += language_score(&group[i], &group[j]);
            pairs += 1;
        }
    }
    let _ = now;
    let region = if pairs > 0 { region_sum / pairs as f64 } else { 1.0 };
    let language = if pairs > 0 { language_sum / pairs as f64 } else { 1.0 };

    let skills: Vec<f64> = group
        .iter()
        .filter_map(|m| m.user.profile_for(primary_game).map(|p| p.skill_level as f64))
        .collect();
    let skill_balance = if skills.len() >= 2 {
        let max = skills.iter().cloned().fold(f64::MIN, f64::max);
        let min = skills.iter().cloned().fold(f64::MAX, f64::min);
        1.0 - (max - min) / 100.0
    } else {
        1.0
    };

    let overall = (0.3 * region + 0.2 * language + 0.5 * skill_balance) * 100.0;
    MatchQualityScore {
        region: region * 100.0,
        language: language * 100.0,
        skill_balance: skill_balance * 100.0,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::{
        GameMode, GroupSize, LanguagePreference, Region, RegionPreference, SearchCriteria,
        SkillPreference, WeightedGame,
    };
    use crate::domain::match_request::MatchRequest;
    use crate::domain::user::{GameProfile, User, UserStatus};

    fn user(skill: u8, game_id: Uuid) -> User {
        User {
            id: Uuid::new_v4(),
            username: "p".into(),
            status: UserStatus::Active,
            game_profiles: vec![GameProfile {
                game_id,
                skill_level: skill,
                rank: None,
                in_game_name: None,
            }],
            last_active: 0,
        }
    }

    fn enriched(skill: u8, game_id: Uuid, start: u64) -> EnrichedRequest {
        let criteria = SearchCriteria {
            games: vec![WeightedGame { game_id, weight: 10 }],
            game_mode: GameMode::Competitive,
            group_size: GroupSize { min: 2, max: 4 },
            regions: vec![Region::Na],
            region_preference: RegionPreference::Strict,
            languages: vec!["en".into()],
            language_preference: LanguagePreference::Strict,
            skill_preference: SkillPreference::Similar,
            scheduled_time: None,
        };
        let u = user(skill, game_id);
        let req = MatchRequest::new(Uuid::new_v4(), u.id, criteria, vec![], start);
        EnrichedRequest::new(req, u)
    }

    #[test]
    fn s1_two_similar_players_score_above_threshold() {
        let game_id = Uuid::new_v4();
        let a = enriched(50, game_id, 0);
        let b = enriched(52, game_id, 100);
        let score = compatibility_score(&a, &b, 200);
        assert!(score >= acceptance_threshold(0), "score was {score}");
    }

    #[test]
    fn different_game_modes_hard_gate_to_zero() {
        let game_id = Uuid::new_v4();
        let mut a = enriched(50, game_id, 0);
        a.request.criteria.game_mode = GameMode::Casual;
        let b = enriched(50, game_id, 0);
        assert_eq!(compatibility_score(&a, &b, 0), 0.0);
    }

    #[test]
    fn s3_relaxation_enables_match_over_time() {
        let game_id = Uuid::new_v4();
        let mut a = enriched(50, game_id, 0);
        let b = enriched(70, game_id, 0);

        // t=0: neither relaxed, tolerance=10, delta=20 -> skill score 0.
        let score_t0 = compatibility_score(&a, &b, 0);
        assert!(score_t0 < BASE_ACCEPTANCE_THRESHOLD);

        // t=60s: a relaxed to level 2 (tolerance 20), still below threshold.
        a.request.relaxation_level = 2;
        let score_t60 = compatibility_score(&a, &b, 60_000);
        assert!(score_t60 < BASE_ACCEPTANCE_THRESHOLD);

        // t=90s: both relaxed to >=2 -> tolerance 20, but per spec at t=90s
        // "both relaxed" implies higher combined relaxation; bump b too.
        let mut b90 = b.clone();
        b90.request.relaxation_level = 2;
        let score_t90 = compatibility_score(&a, &b90, 90_000);
        assert!(score_t90 > score_t60);
    }

    #[test]
    fn relaxation_is_clamped_and_monotone_at_boundaries() {
        assert_eq!(MatchRequest::relaxation_for_duration(0), 0);
        assert_eq!(MatchRequest::relaxation_for_duration(30_000), 1);
        assert_eq!(MatchRequest::relaxation_for_duration(60_000), 2);
        assert_eq!(MatchRequest::relaxation_for_duration(300_000), 10);
        assert_eq!(MatchRequest::relaxation_for_duration(10_000_000), 10);
    }

    #[test]
    fn select_groups_forms_one_match_at_exact_min_group_size() {
        let game_id = Uuid::new_v4();
        let bucket = vec![enriched(50, game_id, 0), enriched(52, game_id, 100)];
        let groups = select_groups(&bucket, 0, 1_000, DEFAULT_MIN_GROUP_SIZE);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn select_groups_leaves_lone_request_unmatched() {
        let game_id = Uuid::new_v4();
        let bucket = vec![enriched(50, game_id, 0)];
        let groups = select_groups(&bucket, 0, 1_000, DEFAULT_MIN_GROUP_SIZE);
        assert!(groups.is_empty());
    }
}
