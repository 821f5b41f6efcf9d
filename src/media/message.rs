//! C wire form of [`NotificationEvent`]
//!
//! Native hosts receive notifications by value as a 4-byte packed struct: a
//! 16-bit tag followed by a value union at offset 4. Alignment gaps are
//! spelled out as reserved fields so every byte handed to the host is written,
//! and zero unless the active member uses it.

use super::notification::{MediaDescription, NotificationEvent, PlaybackState};
use super::ticks::Ticks;

/// Tag stored in [`PlaybackStateMessage::kind`]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    None = 0,
    Opened = 1,
    StateChanged = 2,
    Failed = 3,
    /// Reserved; position changes travel as `StateChanged`
    PositionChanged = 4,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaDescriptionWire {
    pub width: u32,
    pub height: u32,
    pub duration: i64,
    pub can_seek: u8,
    _reserved: [u8; 3],
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct StateWire {
    pub state: u16,
    _reserved: u16,
    pub position: i64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union PlaybackStateValue {
    pub state: StateWire,
    pub hresult: i32,
    pub description: MediaDescriptionWire,
}

#[repr(C, packed(4))]
#[derive(Clone, Copy)]
pub struct PlaybackStateMessage {
    pub kind: u16,
    _reserved: u16,
    pub value: PlaybackStateValue,
}

impl PlaybackStateMessage {
    /// Empty message with every byte zeroed
    ///
    /// The description is the largest member, so it covers the whole union.
    pub fn none() -> Self {
        Self {
            kind: MessageKind::None as u16,
            _reserved: 0,
            value: PlaybackStateValue {
                description: MediaDescriptionWire::default(),
            },
        }
    }

    /// Read the message back; `None` for the empty tag or an unknown one
    pub fn to_event(&self) -> Option<NotificationEvent> {
        let kind = self.kind;
        let value = self.value;
        // SAFETY: each arm reads the member written for that tag, and every
        // member is plain old data valid for any bit pattern
        unsafe {
            match kind {
                k if k == MessageKind::Opened as u16 => {
                    let d = value.description;
                    Some(NotificationEvent::Opened(MediaDescription {
                        width: d.width,
                        height: d.height,
                        duration: Ticks(d.duration),
                        can_seek: d.can_seek != 0,
                    }))
                }
                k if k == MessageKind::StateChanged as u16
                    || k == MessageKind::PositionChanged as u16 =>
                {
                    let s = value.state;
                    Some(NotificationEvent::StateChanged {
                        state: PlaybackState::from_raw(s.state),
                        position: Ticks(s.position),
                    })
                }
                k if k == MessageKind::Failed as u16 => Some(NotificationEvent::Failed {
                    code: value.hresult,
                    message: String::new(),
                }),
                _ => None,
            }
        }
    }
}

impl Default for PlaybackStateMessage {
    fn default() -> Self {
        Self::none()
    }
}

impl From<&NotificationEvent> for PlaybackStateMessage {
    /// The failure message does not cross the boundary, only the code
    fn from(event: &NotificationEvent) -> Self {
        // Members are written in place so the zeroed tail of the union stays.
        // SAFETY: every union member is plain old data valid for any bits.
        let mut message = Self::none();
        unsafe {
            match event {
                NotificationEvent::Opened(description) => {
                    message.kind = MessageKind::Opened as u16;
                    message.value.description.width = description.width;
                    message.value.description.height = description.height;
                    message.value.description.duration = description.duration.0;
                    message.value.description.can_seek = description.can_seek as u8;
                }
                NotificationEvent::StateChanged { state, position } => {
                    message.kind = MessageKind::StateChanged as u16;
                    message.value.state.state = *state as u16;
                    message.value.state.position = position.0;
                }
                NotificationEvent::Failed { code, .. } => {
                    message.kind = MessageKind::Failed as u16;
                    message.value.hresult = *code;
                }
            }
        }
        message
    }
}

impl std::fmt::Debug for PlaybackStateMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self.kind;
        f.debug_struct("PlaybackStateMessage")
            .field("kind", &kind)
            .field("event", &self.to_event())
            .finish()
    }
}
