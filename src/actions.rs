//! Recommended-action lookup table.
//!
//! Keyed by `(AlertType, Severity)`; static and reproducible so it can be
//! tested without any text generation in the loop.

use crate::alert::{AlertType, Severity};

pub fn recommended_actions(alert_type: AlertType, severity: Severity) -> &'static [&'static str] {
    use AlertType::*;
    use Severity::*;

    match (alert_type, severity) {
        (CrisisRisk, _) => &[
            "Contact a crisis line now (call or text 988 in the US)",
            "Reach out to your emergency contact",
            "Remove access to means of self-harm if you can",
            "Go to the nearest emergency department if you are in danger",
        ],

        (EmergencyFallback, _) => &[
            "We could not reach your emergency contacts: call your local emergency number directly",
            "Contact a crisis line (call or text 988 in the US)",
        ],

        (DepressionRisk, Low) => &[
            "Log your mood daily this week",
            "Plan one enjoyable activity for tomorrow",
        ],
        (DepressionRisk, Moderate) => &[
            "Try a guided behavioral-activation exercise",
            "Reach out to someone you trust",
            "Take the PHQ-9 check-in",
        ],
        (DepressionRisk, High) => &[
            "Schedule a session with a licensed therapist",
            "Share how you are feeling with a trusted person today",
            "Review your safety plan",
        ],
        (DepressionRisk, Critical) => &[
            "Contact a mental health professional today",
            "Reach out to your emergency contact",
            "Contact a crisis line if you feel unsafe (call or text 988 in the US)",
        ],

        (BurnoutRisk, Low) => &[
            "Block short recovery breaks into your day",
            "Keep a consistent finish time for work",
        ],
        (BurnoutRisk, Moderate) => &[
            "Try a 10-minute stress-reduction exercise",
            "Identify one commitment you can postpone",
            "Get some light movement outdoors",
        ],
        (BurnoutRisk, High) => &[
            "Talk to a therapist or counselor about workload stress",
            "Discuss workload adjustments with your manager or school",
            "Protect at least one full rest day this week",
        ],
        (BurnoutRisk, Critical) => &[
            "Contact a mental health professional today",
            "Step back from non-essential obligations",
            "Reach out to your emergency contact",
        ],

        (AnxietySpike, Low) => &[
            "Try a box-breathing exercise",
            "Limit caffeine today",
        ],
        (AnxietySpike, Moderate) => &[
            "Use a grounding exercise (5-4-3-2-1)",
            "Write down what is worrying you",
            "Take the GAD-7 check-in",
        ],
        (AnxietySpike, High) => &[
            "Schedule a session with a licensed therapist",
            "Practice a guided relaxation session today",
            "Tell someone you trust how you are feeling",
        ],
        (AnxietySpike, Critical) => &[
            "Contact a mental health professional today",
            "Reach out to your emergency contact",
            "Contact a crisis line if you feel unsafe (call or text 988 in the US)",
        ],

        (SleepDisruption, Low) => &[
            "Keep a consistent bedtime",
            "Avoid screens for an hour before bed",
        ],
        (SleepDisruption, Moderate) => &[
            "Follow a wind-down routine tonight",
            "Avoid caffeine after noon",
            "Track your sleep for the next week",
        ],
        (SleepDisruption, High) => &[
            "Talk to a healthcare provider about your sleep",
            "Try a CBT-I based sleep program",
            "Avoid alcohol close to bedtime",
        ],
        (SleepDisruption, Critical) => &[
            "Contact a healthcare provider about your sleep today",
            "Reach out to someone you trust",
            "Contact a crisis line if you feel unsafe (call or text 988 in the US)",
        ],
    }
}
