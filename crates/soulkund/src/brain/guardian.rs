//! Rule-based safety evaluator, independent of the LLM's own judgment.
//!
//! Pure evaluation over static pattern tables. When several categories
//! match, a fixed severity ranking decides: self-harm/mental-health risk
//! over retention risk over organizational criticism over HR-authority
//! topics. Only the highest-severity match determines the verdict; lower
//! matches are kept in the outcome for logging only.

use regex::Regex;
use std::sync::LazyLock;

use soulkun_shared::{ReasonCode, ToolCall};

/// Severity tiers, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    fn rank(&self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }
}

/// Guardian's verdict for one message/action pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianDecision {
    Approve,
    BlockAndSuggest,
    ForceModeSwitch,
}

/// Full evaluation outcome.
#[derive(Debug, Clone)]
pub struct GuardianOutcome {
    pub decision: GuardianDecision,
    pub reason: ReasonCode,
    pub severity: Option<Severity>,
    /// User-facing alternative text for non-approve decisions.
    pub suggestion: Option<String>,
    /// Low-severity note that does not change an approve verdict.
    pub advisory: Option<ReasonCode>,
    /// Lower-severity matches, for the log only.
    pub observed: Vec<ReasonCode>,
}

impl GuardianOutcome {
    fn approve() -> Self {
        Self {
            decision: GuardianDecision::Approve,
            reason: ReasonCode::Approved,
            severity: None,
            suggestion: None,
            advisory: None,
            observed: Vec::new(),
        }
    }
}

struct RuleCategory {
    reason: ReasonCode,
    severity: Severity,
    patterns: &'static LazyLock<Vec<Regex>>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

static SELF_HARM: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"死にたい",
        r"消えたい",
        r"自殺",
        r"生きて(いたくない|る意味|ても仕方)",
        r"リストカット",
        r"(?i)kill myself",
        r"(?i)suicide",
    ])
});

static RETENTION_RISK: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"転職",
        r"(会社|仕事)[をも]?\s*(辞め|やめ)たい",
        r"退職(したい|しようか|を考え)",
        r"辞表",
        r"(?i)quit my job",
        r"(?i)resign",
    ])
});

static ORG_CRITICISM: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(会社|うちの組織)(が|は)(嫌|最悪|おかしい|終わって)",
        r"経営陣(が|は)(無能|ダメ|信用できない)",
        r"うちはブラック",
    ])
});

static HR_SENSITIVE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(給料|給与|年収)(が|を)(低い|上げ|下げ)",
        r"査定",
        r"昇進|昇格",
        r"人事異動",
        r"評価面談",
    ])
});

static DATA_LEAKAGE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"パスワード(を|教えて|一覧)",
        r"(APIキー|apiキー|シークレット|秘密鍵)(を|教えて|送って)",
        r"(?i)api[_\s-]?key.*(send|share|教えて)",
        r"トークンを(教えて|共有|送って)",
        r"顧客リストを(社外|外部)に",
    ])
});

static DESTRUCTIVE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(全部|すべて|全て)(削除|消して)",
        r"データを初期化",
        r"(?i)delete (all|everything)",
        r"まとめて消して",
    ])
});

static CATEGORIES: &[RuleCategory] = &[
    RuleCategory {
        reason: ReasonCode::SelfHarmRisk,
        severity: Severity::Critical,
        patterns: &SELF_HARM,
    },
    RuleCategory {
        reason: ReasonCode::RetentionRisk,
        severity: Severity::High,
        patterns: &RETENTION_RISK,
    },
    RuleCategory {
        reason: ReasonCode::OrganizationalCriticism,
        severity: Severity::Medium,
        patterns: &ORG_CRITICISM,
    },
    RuleCategory {
        reason: ReasonCode::DataLeakage,
        severity: Severity::Medium,
        patterns: &DATA_LEAKAGE,
    },
    RuleCategory {
        reason: ReasonCode::DestructiveOperation,
        severity: Severity::Medium,
        patterns: &DESTRUCTIVE,
    },
    RuleCategory {
        reason: ReasonCode::HrSensitive,
        severity: Severity::Low,
        patterns: &HR_SENSITIVE,
    },
];

fn suggestion_for(reason: ReasonCode) -> String {
    match reason {
        ReasonCode::SelfHarmRisk => {
            "つらい気持ちを話してくれてありがとう。いまは何も解決しようとしなくて大丈夫です。\
             よかったら、もう少しだけ聞かせてください。"
        }
        ReasonCode::RetentionRisk => {
            "そうなんですね。大事な話だと思うので、まずはゆっくり聞かせてください。\
             何がいちばん引っかかっていますか?"
        }
        ReasonCode::OrganizationalCriticism => {
            "モヤモヤしているんですね。この場で会社の評価を断定するより、\
             何があったかを整理してみませんか?"
        }
        ReasonCode::DataLeakage => {
            "認証情報や顧客データの共有はここではできない決まりです。\
             管理者経由の共有手順を使ってください。"
        }
        ReasonCode::DestructiveOperation => {
            "まとめて削除は取り返しがつかないのでここでは実行しません。\
             対象を1件ずつ指定してもらえますか?"
        }
        _ => "この内容はここでは扱えませんでした。",
    }
    .to_string()
}

/// The guardian gate. Stateless; pattern tables are compiled once.
pub struct Guardian;

impl Guardian {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one message and the proposed action, if any.
    ///
    /// Pure over the inputs: same message and action always produce the
    /// same outcome.
    pub fn evaluate(&self, message: &str, action: Option<&ToolCall>) -> GuardianOutcome {
        // Action parameters are scanned too: leakage attempts can hide in
        // tool arguments rather than the visible message.
        let mut haystack = message.to_string();
        if let Some(call) = action {
            haystack.push('\n');
            haystack.push_str(&call.name);
            haystack.push('\n');
            haystack.push_str(&call.params.to_string());
        }

        let mut matches: Vec<(Severity, ReasonCode)> = Vec::new();
        for category in CATEGORIES {
            if category.patterns.iter().any(|p| p.is_match(&haystack)) {
                matches.push((category.severity, category.reason));
            }
        }

        if matches.is_empty() {
            return GuardianOutcome::approve();
        }

        matches.sort_by(|a, b| b.0.rank().cmp(&a.0.rank()));
        let (severity, reason) = matches[0];
        let observed: Vec<ReasonCode> = matches.iter().skip(1).map(|(_, r)| *r).collect();

        match severity {
            // The risk-classified conversational band forces listening mode.
            Severity::Critical | Severity::High => GuardianOutcome {
                decision: GuardianDecision::ForceModeSwitch,
                reason,
                severity: Some(severity),
                suggestion: Some(suggestion_for(reason)),
                advisory: None,
                observed,
            },
            Severity::Medium => GuardianOutcome {
                decision: GuardianDecision::BlockAndSuggest,
                reason,
                severity: Some(severity),
                suggestion: Some(suggestion_for(reason)),
                advisory: None,
                observed,
            },
            Severity::Low => GuardianOutcome {
                decision: GuardianDecision::Approve,
                reason: ReasonCode::Approved,
                severity: Some(severity),
                suggestion: None,
                advisory: Some(reason),
                observed,
            },
        }
    }
}

impl Default for Guardian {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_message_approves() {
        let outcome = Guardian::new().evaluate("今日のタスクを教えて", None);
        assert_eq!(outcome.decision, GuardianDecision::Approve);
        assert!(outcome.advisory.is_none());
    }

    #[test]
    fn test_retention_risk_forces_listening() {
        let outcome = Guardian::new().evaluate("転職を考えてるんだよね", None);
        assert_eq!(outcome.decision, GuardianDecision::ForceModeSwitch);
        assert_eq!(outcome.reason, ReasonCode::RetentionRisk);
        assert!(outcome.suggestion.is_some());
    }

    #[test]
    fn test_self_harm_forces_listening() {
        let outcome = Guardian::new().evaluate("もう死にたいです", None);
        assert_eq!(outcome.decision, GuardianDecision::ForceModeSwitch);
        assert_eq!(outcome.reason, ReasonCode::SelfHarmRisk);
    }

    #[test]
    fn test_severity_tie_break_critical_wins_over_low() {
        // Matches both the critical self-harm and the low HR category.
        let outcome = Guardian::new().evaluate("査定が最悪で死にたい", None);
        assert_eq!(outcome.decision, GuardianDecision::ForceModeSwitch);
        assert_eq!(outcome.reason, ReasonCode::SelfHarmRisk);
        assert!(outcome.observed.contains(&ReasonCode::HrSensitive));
    }

    #[test]
    fn test_org_criticism_blocks_with_suggestion() {
        let outcome = Guardian::new().evaluate("経営陣は無能だと思う", None);
        assert_eq!(outcome.decision, GuardianDecision::BlockAndSuggest);
        assert_eq!(outcome.reason, ReasonCode::OrganizationalCriticism);
        assert!(outcome.suggestion.is_some());
    }

    #[test]
    fn test_hr_topic_approves_with_advisory() {
        let outcome = Guardian::new().evaluate("来期の昇進について相談したい", None);
        assert_eq!(outcome.decision, GuardianDecision::Approve);
        assert_eq!(outcome.advisory, Some(ReasonCode::HrSensitive));
    }

    #[test]
    fn test_leakage_in_action_params_detected() {
        let call = ToolCall::new(
            "create_task",
            json!({"title": "パスワードを教えてもらう"}),
        );
        let outcome = Guardian::new().evaluate("これお願い", Some(&call));
        assert_eq!(outcome.decision, GuardianDecision::BlockAndSuggest);
        assert_eq!(outcome.reason, ReasonCode::DataLeakage);
    }

    #[test]
    fn test_destructive_bulk_delete_blocked() {
        let outcome = Guardian::new().evaluate("ゴールを全部削除して", None);
        assert_eq!(outcome.decision, GuardianDecision::BlockAndSuggest);
        assert_eq!(outcome.reason, ReasonCode::DestructiveOperation);
    }

    #[test]
    fn test_same_input_same_outcome() {
        let g = Guardian::new();
        let a = g.evaluate("転職するか迷う", None);
        let b = g.evaluate("転職するか迷う", None);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.reason, b.reason);
    }
}
