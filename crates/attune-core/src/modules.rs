//! Static catalogs: system instruction, specialist modules, personas, tracks.

use crate::types::{Accent, AmbientTrack, Gender, SpecialistModule, VoiceSettings};

/// Foundation system instruction shared by the text and voice pipelines.
pub const BASE_SYSTEM_INSTRUCTION: &str = "\
You are a modular AI conversational counsellor. Your foundation is built on \
the 9 core counselling skills (UCP framework), enhanced by specialist modules \
selected by the user.

Foundation Skills (UCP 9 Core Skills):
1) Active Listening, 2) Empathy, 3) Nonverbal Awareness, 4) Reflection, \
5) Questioning, 6) Summarising, 7) Rapport-Building, 8) Goal Setting, \
9) Ethical Boundaries.

Core Intent:
- Offer supportive, non-judgemental conversations.
- Prioritise safety and empathy; do not diagnose.
- Turn length: 3-7 sentences.
- Reflect 1-2 emotions and ask 1 open question per turn.";

/// Specialist attunement modules. The active subset is user-selected and
/// concatenated into the effective system instruction at session start.
pub const SPECIALIST_MODULES: &[SpecialistModule] = &[
    SpecialistModule {
        id: "integration",
        name: "Psychedelic Integration",
        icon: "🌀",
        description: "Expertise in navigating altered states of consciousness \
                      and integrating visionary experiences.",
        instruction: "\
ADDITIONAL MODULE: PSYCHEDELIC INTEGRATION SPECIALIZATION
Core Principles:
1. Presence: Maintain a calm, available, and non-intrusive presence. Hold \
space for transpersonal experiences.
2. Non-Directivity: Follow the inner-directive approach. Let the user's \
narrative and psyche define the path.
3. Seven Dimensions: Address integration across Cognitive, Emotional, \
Physical, Spiritual, Behavioral, Social, and Time.
4. Metaphors: Use evocative metaphors like putting together puzzle pieces, \
developing a photo, or planting seeds.",
    },
    SpecialistModule {
        id: "sharing",
        name: "Sharing Circles",
        icon: "⭕",
        description: "Philosophy and management of safe group integration \
                      circles.",
        instruction: "\
ADDITIONAL MODULE: SHARING CIRCLES FACILITATION
Philosophy & Intent:
- The circle is a time capsule and a ceremony in itself.
- Purpose: Provide a safe transition space back to the everyday world and \
witness peer experiences.
The 5 Core Principles:
1. Provide a Metaphor: explorers returning to the fire to share what they \
found.
2. Structure & Context: integration is the third essential part of the \
journey (Preparation, Session, Integration).
3. Meaning and Heart: Encourage users to check inside for what is most \
relevant to share. Sharing is not mandatory.
4. Strictly Non-Directive: This is NOT therapy. Prohibited: giving feedback, \
interpretations, probing questions, debating, or cross-talk. Allowed: \
thanking the user for their open-heartedness and vulnerability.
5. Respecting the Space: Maintain confidentiality, authenticity, and beauty \
in the interaction.",
    },
    SpecialistModule {
        id: "harm_reduction",
        name: "Harm Reduction",
        icon: "🛡️",
        description: "Specialist safety protocols for ontological shock, \
                      groundlessness, and trauma-informed care.",
        instruction: "\
ADDITIONAL MODULE: HARM REDUCTION & EXISTENTIAL SUPPORT
Addressing Ontological Shock & Existential Distress:
- Recognize groundlessness: disorientation when foundational worldviews are \
challenged.
- Support Strategy: Focus on grounding through embodiment, social \
normalization, and cognitive reframing to re-establish ontological security.
Trauma-Informed Care:
- Psychological Safety: Prioritize the therapeutic alliance.
- Be cautious of flooding where repressed material emerges too quickly for \
the user to contain.
- Support users through depersonalization or derealization using grounding \
techniques.
Techniques:
- Talk through, not down: stay with the experience.
- Normalization: reassure the user their difficulties carry potential for \
growth.
- Grounding: use the 5-4-3-2-1 technique or focus on physical sensations.",
    },
];

/// A persona voice offered in settings, with its display label.
pub struct PersonaVoice {
    pub settings: VoiceSettings,
    pub label: &'static str,
}

fn voice(name: &str, gender: Gender, accent: Accent, label: &'static str) -> PersonaVoice {
    PersonaVoice {
        settings: VoiceSettings {
            voice_name: name.to_string(),
            gender,
            accent,
        },
        label,
    }
}

/// All synthesis personas known to the settings surface.
pub fn available_voices() -> Vec<PersonaVoice> {
    vec![
        voice("Kore", Gender::Feminine, Accent::Us, "Kore (US Feminine)"),
        voice("Zephyr", Gender::Neutral, Accent::Us, "Zephyr (US Neutral)"),
        voice("Puck", Gender::Masculine, Accent::Us, "Puck (US Masculine)"),
        voice(
            "Charon",
            Gender::Masculine,
            Accent::Us,
            "Charon (US Masculine Deep)",
        ),
        voice(
            "Fenrir",
            Gender::Masculine,
            Accent::Us,
            "Fenrir (US Masculine Soft)",
        ),
        voice(
            "Aoife",
            Gender::Feminine,
            Accent::Uk,
            "Aoife (UK Feminine - Experimental)",
        ),
        voice(
            "Paddy",
            Gender::Masculine,
            Accent::Uk,
            "Paddy (UK Masculine - Experimental)",
        ),
    ]
}

/// Personas matching the given gender and accent, in catalog order.
pub fn voices_for(gender: Gender, accent: Accent) -> Vec<PersonaVoice> {
    available_voices()
        .into_iter()
        .filter(|v| v.settings.gender == gender && v.settings.accent == accent)
        .collect()
}

/// Ambient atmosphere tracks for the single-track background player.
pub const AMBIENT_TRACKS: &[AmbientTrack] = &[
    AmbientTrack {
        id: "rain",
        name: "Gentle Rain",
        icon: "🌧",
        url: "https://cdn.freesound.org/ambient/gentle-rain-loop.mp3",
        description: "Soft rainfall on leaves.",
    },
    AmbientTrack {
        id: "bowls",
        name: "Singing Bowls",
        icon: "🎵",
        url: "https://cdn.freesound.org/ambient/singing-bowls-loop.mp3",
        description: "Slow resonant Tibetan bowls.",
    },
    AmbientTrack {
        id: "forest",
        name: "Forest Dawn",
        icon: "🌲",
        url: "https://cdn.freesound.org/ambient/forest-dawn-loop.mp3",
        description: "Birdsong and distant wind.",
    },
];

/// Crisis resources shown from the home surface. Static, always available.
pub const CRISIS_NOTICE: &str = "\
In immediate distress? If you are in danger, please reach out to emergency \
services. Text HOME to 741741 or call 988.";

/// Compose the effective system instruction from the base, the active
/// specialist modules, and the optional display name.
pub fn compose_system_instruction(active_ids: &[String], display_name: Option<&str>) -> String {
    let mut instruction = BASE_SYSTEM_INSTRUCTION.to_string();
    for id in active_ids {
        if let Some(module) = SPECIALIST_MODULES.iter().find(|m| m.id == id) {
            instruction.push('\n');
            instruction.push_str(module.instruction);
        }
    }
    if let Some(name) = display_name {
        instruction.push_str(&format!(
            "\nThe user has asked to be addressed as \"{name}\". Use their \
             name naturally and sparingly."
        ));
    }
    instruction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_base_only() {
        let instruction = compose_system_instruction(&[], None);
        assert_eq!(instruction, BASE_SYSTEM_INSTRUCTION);
    }

    #[test]
    fn test_compose_appends_active_modules_in_order() {
        let active = vec!["harm_reduction".to_string(), "integration".to_string()];
        let instruction = compose_system_instruction(&active, None);
        let harm = instruction.find("HARM REDUCTION").unwrap();
        let integration = instruction.find("PSYCHEDELIC INTEGRATION").unwrap();
        assert!(harm < integration, "modules appended in selection order");
    }

    #[test]
    fn test_compose_ignores_unknown_ids() {
        let active = vec!["not_a_module".to_string()];
        let instruction = compose_system_instruction(&active, None);
        assert_eq!(instruction, BASE_SYSTEM_INSTRUCTION);
    }

    #[test]
    fn test_compose_includes_display_name() {
        let instruction = compose_system_instruction(&[], Some("Robin"));
        assert!(instruction.contains("Robin"));
    }

    #[test]
    fn test_voice_filtering() {
        let uk_fem = voices_for(Gender::Feminine, Accent::Uk);
        assert_eq!(uk_fem.len(), 1);
        assert_eq!(uk_fem[0].settings.voice_name, "Aoife");

        let us_masc = voices_for(Gender::Masculine, Accent::Us);
        assert_eq!(us_masc.len(), 3);
    }
}
