//! Block content types and their wire encoders

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::constants::{hit, text};
use crate::net::bytes::ByteWriter;

use super::catalogue::BlockKind;
use super::overrides::ObserverOverrides;
use super::slot::{ObserverBlock, SharedBlock};
use super::{EncodeContext, EncodeError, ObserverId};

/// Sentinel for "none" in u16 id fields
pub const NONE_ID: u16 = 0xFFFF;
/// Sentinel for "no icon" in u8 icon fields
pub const NONE_ICON: u8 = 0xFF;

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), EncodeError> {
    let len = value.chars().count();
    if len > max {
        return Err(EncodeError::TooLong { field, len, max });
    }
    Ok(())
}

// ============================================================================
// Appearance
// ============================================================================

/// Worn equipment, colours, and identity of an avatar
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Appearance {
    pub name: String,
    pub gender: u8,
    pub skull_icon: Option<u8>,
    pub overhead_icon: Option<u8>,
    /// Render as another model instead of the body slots
    pub transmog: Option<u16>,
    pub body: [u16; 12],
    pub colours: [u8; 5],
    pub base_animations: [u16; 7],
    pub combat_level: u8,
    pub skill_level: u16,
    pub hidden: bool,
}

impl SharedBlock for Appearance {
    const KIND: BlockKind = BlockKind::Appearance;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        check_text("appearance name", &self.name, text::MAX_NAME_CHARS)?;

        // Length-prefixed so the client can skip the payload.
        let len_at = out.len();
        out.write_u8(0);
        out.write_u8(self.gender);
        out.write_u8(self.skull_icon.unwrap_or(NONE_ICON));
        out.write_u8(self.overhead_icon.unwrap_or(NONE_ICON));
        match self.transmog {
            Some(id) => {
                out.write_u16(NONE_ID);
                out.write_u16(id);
            }
            None => {
                for slot in self.body {
                    out.write_u16(slot);
                }
            }
        }
        out.write_bytes(&self.colours);
        for anim in self.base_animations {
            out.write_u16(anim);
        }
        out.write_str(&self.name);
        out.write_u8(self.combat_level);
        out.write_u16(self.skill_level);
        out.write_bool(self.hidden);

        let payload = out.len() - len_at - 1;
        out[len_at] = payload as u8;
        Ok(())
    }
}

// ============================================================================
// Animation and graphics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sequence {
    pub id: u16,
    pub delay: u8,
}

impl SharedBlock for Sequence {
    const KIND: BlockKind = BlockKind::Sequence;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.write_u16(self.id);
        out.write_u8(self.delay);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpotAnim {
    pub id: u16,
    pub height: u16,
    pub delay: u16,
}

impl SharedBlock for SpotAnim {
    const KIND: BlockKind = BlockKind::SpotAnim;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.write_u16(self.id);
        out.write_u16(self.height);
        out.write_u16(self.delay);
        Ok(())
    }
}

/// Forced movement between two offsets from the avatar's current tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExactMove {
    pub start_dx: i8,
    pub start_dz: i8,
    pub end_dx: i8,
    pub end_dz: i8,
    pub start_delay: u16,
    pub end_delay: u16,
    pub direction: u16,
}

impl SharedBlock for ExactMove {
    const KIND: BlockKind = BlockKind::ExactMove;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.write_i8(self.start_dx);
        out.write_i8(self.start_dz);
        out.write_i8(self.end_dx);
        out.write_i8(self.end_dz);
        out.write_u16(self.start_delay);
        out.write_u16(self.end_delay);
        out.write_u16(self.direction);
        Ok(())
    }
}

// ============================================================================
// Facing
// ============================================================================

/// Continuously face another avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FacePathingEntity {
    pub target: Option<u16>,
}

impl SharedBlock for FacePathingEntity {
    const KIND: BlockKind = BlockKind::FacePathingEntity;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.write_u16(self.target.unwrap_or(NONE_ID));
        Ok(())
    }
}

/// Turn to a fixed angle (0..2048, 0 = south, clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceAngle {
    pub angle: u16,
    pub instant: bool,
}

impl FaceAngle {
    pub const ANGLE_STEPS: u16 = 2048;
}

impl SharedBlock for FaceAngle {
    const KIND: BlockKind = BlockKind::FaceAngle;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.angle >= Self::ANGLE_STEPS {
            return Err(EncodeError::OutOfRange {
                field: "face angle",
                value: self.angle as i64,
            });
        }
        out.write_u16(self.angle);
        out.write_bool(self.instant);
        Ok(())
    }
}

/// Movement speed the client animates with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveSpeed {
    Stationary,
    Crawl,
    #[default]
    Walk,
    Run,
}

impl MoveSpeed {
    pub const fn id(self) -> i8 {
        match self {
            MoveSpeed::Stationary => -1,
            MoveSpeed::Crawl => 0,
            MoveSpeed::Walk => 1,
            MoveSpeed::Run => 2,
        }
    }

    pub const fn from_id(id: i8) -> Option<Self> {
        match id {
            -1 => Some(MoveSpeed::Stationary),
            0 => Some(MoveSpeed::Crawl),
            1 => Some(MoveSpeed::Walk),
            2 => Some(MoveSpeed::Run),
            _ => None,
        }
    }
}

impl SharedBlock for MoveSpeed {
    const KIND: BlockKind = BlockKind::MoveSpeed;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.write_i8(self.id());
        Ok(())
    }
}

// ============================================================================
// Text
// ============================================================================

/// Overhead text without a chat box entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Say {
    pub text: String,
}

impl SharedBlock for Say {
    const KIND: BlockKind = BlockKind::Say;

    fn encode(&self, _ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        check_text("say text", &self.text, text::MAX_MESSAGE_CHARS)?;
        out.write_str(&self.text);
        Ok(())
    }
}

/// Public chat message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Chat {
    pub text: String,
    pub colour: u8,
    pub effects: u8,
    pub mod_icon: u8,
    pub autotyper: bool,
}

impl SharedBlock for Chat {
    const KIND: BlockKind = BlockKind::Chat;

    fn encode(&self, ctx: &EncodeContext<'_>, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        check_text("chat text", &self.text, text::MAX_MESSAGE_CHARS)?;
        out.write_u8(self.colour);
        out.write_u8(self.effects);
        out.write_u8(self.mod_icon);
        out.write_bool(self.autotyper);

        let len_at = out.len();
        out.write_u8(0);
        ctx.codec.compress(&self.text, out)?;
        let compressed = out.len() - len_at - 1;
        if compressed > text::MAX_COMPRESSED_BYTES {
            return Err(EncodeError::TooLong {
                field: "compressed chat",
                len: compressed,
                max: text::MAX_COMPRESSED_BYTES,
            });
        }
        out[len_at] = compressed as u8;
        Ok(())
    }
}

// ============================================================================
// Hits
// ============================================================================

/// Damage splat. The source observer sees `self_type`, everyone else sees
/// `other_type`; `None` hides it from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hitmark {
    pub source: Option<ObserverId>,
    pub self_type: u16,
    pub other_type: Option<u16>,
    pub value: u16,
    pub delay: u8,
}

impl Hitmark {
    fn type_for(&self, observer: ObserverId) -> Option<u16> {
        if self.source == Some(observer) {
            Some(self.self_type)
        } else {
            self.other_type
        }
    }
}

/// Health bar transition, with the same source split as [`Hitmark`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headbar {
    pub source: Option<ObserverId>,
    pub self_id: u16,
    pub other_id: Option<u16>,
    pub start_fill: u8,
    pub end_fill: u8,
    pub delay: u16,
    pub duration: u16,
}

impl Headbar {
    fn id_for(&self, observer: ObserverId) -> Option<u16> {
        if self.source == Some(observer) {
            Some(self.self_id)
        } else {
            self.other_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HitBlock {
    pub hitmarks: SmallVec<[Hitmark; hit::MAX_HITMARKS]>,
    pub headbars: SmallVec<[Headbar; hit::MAX_HEADBARS]>,
}

impl HitBlock {
    /// Queue a hitmark; returns false when the tick's slots are full
    pub fn push_hitmark(&mut self, hitmark: Hitmark) -> bool {
        if self.hitmarks.len() >= hit::MAX_HITMARKS {
            return false;
        }
        self.hitmarks.push(hitmark);
        true
    }

    pub fn push_headbar(&mut self, headbar: Headbar) -> bool {
        if self.headbars.len() >= hit::MAX_HEADBARS {
            return false;
        }
        self.headbars.push(headbar);
        true
    }
}

impl ObserverBlock for HitBlock {
    const KIND: BlockKind = BlockKind::Hit;

    fn has_content_for(&self, observer: ObserverId) -> bool {
        self.hitmarks.iter().any(|h| h.type_for(observer).is_some())
            || self.headbars.iter().any(|h| h.id_for(observer).is_some())
    }

    fn encode_for(&self, observer: ObserverId, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let count_at = out.len();
        out.write_u8(0);
        let mut count = 0u8;
        for mark in &self.hitmarks {
            if let Some(kind) = mark.type_for(observer) {
                out.write_u16(kind);
                out.write_u16(mark.value);
                out.write_u8(mark.delay);
                count += 1;
            }
        }
        out[count_at] = count;

        let count_at = out.len();
        out.write_u8(0);
        let mut count = 0u8;
        for bar in &self.headbars {
            if let Some(id) = bar.id_for(observer) {
                out.write_u16(id);
                out.write_u8(bar.start_fill);
                out.write_u8(bar.end_fill);
                out.write_u16(bar.delay);
                out.write_u16(bar.duration);
                count += 1;
            }
        }
        out[count_at] = count;
        Ok(())
    }
}

// ============================================================================
// Tint
// ============================================================================

/// Colour overlay for a window of client cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tint {
    pub start: u16,
    pub end: u16,
    pub hue: u8,
    pub saturation: u8,
    pub lightness: u8,
    pub weight: u8,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TintBlock {
    pub variants: ObserverOverrides<Tint>,
}

impl ObserverBlock for TintBlock {
    const KIND: BlockKind = BlockKind::Tint;

    fn has_content_for(&self, observer: ObserverId) -> bool {
        self.variants.resolve(observer).is_some()
    }

    fn encode_for(&self, observer: ObserverId, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let Some(tint) = self.variants.resolve(observer) else {
            return Err(EncodeError::NoContent { kind: Self::KIND, observer });
        };
        out.write_u16(tint.start);
        out.write_u16(tint.end);
        out.write_u8(tint.hue);
        out.write_u8(tint.saturation);
        out.write_u8(tint.lightness);
        out.write_u8(tint.weight);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::codec::Latin1Codec;

    fn ctx() -> EncodeContext<'static> {
        EncodeContext { codec: &Latin1Codec }
    }

    fn full_appearance() -> Appearance {
        Appearance {
            name: "Zezima12345x".into(),
            gender: 1,
            skull_icon: Some(0),
            overhead_icon: Some(3),
            transmog: None,
            body: [0x1FF; 12],
            colours: [1, 2, 3, 4, 5],
            base_animations: [808, 823, 819, 820, 821, 822, 824],
            combat_level: 126,
            skill_level: 2277,
            hidden: false,
        }
    }

    #[test]
    fn test_appearance_worst_case_matches_catalogue() {
        let mut out = Vec::new();
        full_appearance().encode(&ctx(), &mut out).unwrap();
        assert_eq!(out.len(), BlockKind::Appearance.max_encoded_size());
        assert_eq!(out[0] as usize, out.len() - 1);
    }

    #[test]
    fn test_appearance_transmog_is_shorter() {
        let mut appearance = full_appearance();
        appearance.transmog = Some(8000);
        let mut out = Vec::new();
        appearance.encode(&ctx(), &mut out).unwrap();
        assert_eq!(out.len(), BlockKind::Appearance.max_encoded_size() - 20);
        assert_eq!(&out[4..8], &[0xFF, 0xFF, 0x1F, 0x40]);
    }

    #[test]
    fn test_appearance_rejects_long_name() {
        let mut appearance = full_appearance();
        appearance.name = "ThirteenChars".into();
        let mut out = Vec::new();
        assert!(matches!(
            appearance.encode(&ctx(), &mut out),
            Err(EncodeError::TooLong { .. })
        ));
    }

    #[test]
    fn test_say_worst_case_matches_catalogue() {
        let say = Say { text: "x".repeat(text::MAX_MESSAGE_CHARS) };
        let mut out = Vec::new();
        say.encode(&ctx(), &mut out).unwrap();
        assert_eq!(out.len(), BlockKind::Say.max_encoded_size());
        assert_eq!(out.last(), Some(&0));
    }

    #[test]
    fn test_chat_layout() {
        let chat = Chat {
            text: "hi".into(),
            colour: 2,
            effects: 1,
            mod_icon: 0,
            autotyper: false,
        };
        let mut out = Vec::new();
        chat.encode(&ctx(), &mut out).unwrap();
        assert_eq!(out, vec![2, 1, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_fixed_size_blocks_match_catalogue() {
        let cases: Vec<(BlockKind, Vec<u8>)> = vec![
            (BlockKind::Sequence, {
                let mut out = Vec::new();
                Sequence { id: 1, delay: 0 }.encode(&ctx(), &mut out).unwrap();
                out
            }),
            (BlockKind::SpotAnim, {
                let mut out = Vec::new();
                SpotAnim::default().encode(&ctx(), &mut out).unwrap();
                out
            }),
            (BlockKind::ExactMove, {
                let mut out = Vec::new();
                ExactMove::default().encode(&ctx(), &mut out).unwrap();
                out
            }),
            (BlockKind::FacePathingEntity, {
                let mut out = Vec::new();
                FacePathingEntity { target: Some(3) }.encode(&ctx(), &mut out).unwrap();
                out
            }),
            (BlockKind::FaceAngle, {
                let mut out = Vec::new();
                FaceAngle { angle: 1024, instant: true }.encode(&ctx(), &mut out).unwrap();
                out
            }),
            (BlockKind::MoveSpeed, {
                let mut out = Vec::new();
                MoveSpeed::Run.encode(&ctx(), &mut out).unwrap();
                out
            }),
        ];
        for (kind, bytes) in cases {
            assert_eq!(bytes.len(), kind.max_encoded_size(), "{}", kind);
        }
    }

    #[test]
    fn test_face_angle_range() {
        let mut out = Vec::new();
        let angle = FaceAngle { angle: 2048, instant: false };
        assert!(angle.encode(&ctx(), &mut out).is_err());
    }

    #[test]
    fn test_hit_source_split() {
        let attacker = ObserverId(1);
        let bystander = ObserverId(2);
        let mut block = HitBlock::default();
        block.push_hitmark(Hitmark {
            source: Some(attacker),
            self_type: 16,
            other_type: Some(17),
            value: 5,
            delay: 0,
        });
        block.push_hitmark(Hitmark {
            source: Some(attacker),
            self_type: 12,
            other_type: None,
            value: 0,
            delay: 0,
        });

        let mut seen_by_attacker = Vec::new();
        block.encode_for(attacker, &mut seen_by_attacker).unwrap();
        assert_eq!(seen_by_attacker[0], 2);

        let mut seen_by_bystander = Vec::new();
        block.encode_for(bystander, &mut seen_by_bystander).unwrap();
        assert_eq!(seen_by_bystander, vec![1, 0, 17, 0, 5, 0, 0]);
    }

    #[test]
    fn test_hit_worst_case_matches_catalogue() {
        let mut block = HitBlock::default();
        for _ in 0..hit::MAX_HITMARKS {
            assert!(block.push_hitmark(Hitmark {
                source: None,
                self_type: 1,
                other_type: Some(1),
                value: 99,
                delay: 0,
            }));
        }
        for _ in 0..hit::MAX_HEADBARS {
            assert!(block.push_headbar(Headbar {
                source: None,
                self_id: 0,
                other_id: Some(0),
                start_fill: 30,
                end_fill: 0,
                delay: 0,
                duration: 10,
            }));
        }
        assert!(!block.push_hitmark(block.hitmarks[0]));

        let mut out = Vec::new();
        block.encode_for(ObserverId(0), &mut out).unwrap();
        assert_eq!(out.len(), BlockKind::Hit.max_encoded_size());
    }

    #[test]
    fn test_tint_override() {
        let mut block = TintBlock::default();
        block.variants.set_for(ObserverId(9), Tint { weight: 100, ..Tint::default() });

        assert!(block.has_content_for(ObserverId(9)));
        assert!(!block.has_content_for(ObserverId(1)));

        let mut out = Vec::new();
        block.encode_for(ObserverId(9), &mut out).unwrap();
        assert_eq!(out.len(), BlockKind::Tint.max_encoded_size());
        assert_eq!(out[7], 100);
        assert!(block.encode_for(ObserverId(1), &mut Vec::new()).is_err());
    }
}
