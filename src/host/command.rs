//! Decoding of host commands
//!
//! A command is `C` followed by its two-digit number, then one `|`-separated
//! field per entry of its schema, then `\r`, `\n` or `\r\n`:
//!
//! | Kind  | Encoding                                           |
//! |-------|----------------------------------------------------|
//! | Int   | decimal ASCII, optionally signed                   |
//! | Bool  | one byte, `0`/`1` in ASCII or as raw `0x00`/`0x01` |
//! | Float | four raw bytes, little-endian IEEE 754             |
//! | Str   | UTF-8 up to the next `|` or terminator             |
//! | Blob  | length as `u16` little-endian, then the raw bytes  |
//!
//! Binary fields may contain delimiter bytes, so a command is only complete
//! once every field has been read according to its kind.

use byte::{BytesExt, LE};
#[cfg(feature = "defmt")]
use defmt::Format;
use heapless::Vec;

/// Most fields any command has
pub const MAX_FIELDS: usize = 4;

const SEPARATOR: u8 = b'|';

/// The encoding of a field
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum FieldKind {
    /// Decimal integer
    Int,
    /// Single byte flag
    Bool,
    /// Raw `f32`
    Float,
    /// Text
    Str,
    /// Length-prefixed bytes
    Blob,
}

/// A decoded field, borrowing from the input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    /// Decimal integer
    Int(i32),
    /// Single byte flag
    Bool(bool),
    /// Raw `f32`
    Float(f32),
    /// Text
    Str(&'a str),
    /// Length-prefixed bytes
    Blob(&'a [u8]),
}

/// The fields each command number takes
pub const SCHEMA: [(u8, &[FieldKind]); 8] = [
    (0, &[]),
    (1, &[]),
    (2, &[]),
    (3, &[]),
    (4, &[FieldKind::Bool]),
    (5, &[FieldKind::Int, FieldKind::Bool, FieldKind::Bool]),
    (6, &[FieldKind::Blob]),
    (7, &[]),
];

/// Looks up the schema of a command number
pub fn schema(number: u8) -> Option<&'static [FieldKind]> {
    SCHEMA
        .iter()
        .find(|(n, _)| *n == number)
        .map(|(_, fields)| *fields)
}

/// Error decoding a command
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ParseError {
    /// The input ends before the command does
    Incomplete,
    /// The input does not start with `C` and two digits
    BadHeader,
    /// No command has this number
    UnknownCommand(u8),
    /// A field is missing or does not decode as its kind
    BadField {
        /// Number of the command
        command: u8,
        /// Position of the field in the schema
        index: usize,
    },
    /// The command goes on after its last field
    MissingTerminator {
        /// Number of the command
        command: u8,
    },
}

impl ParseError {
    /// Number of the command, if it was decoded before the error
    pub fn command(&self) -> Option<u8> {
        match self {
            ParseError::UnknownCommand(command)
            | ParseError::BadField { command, .. }
            | ParseError::MissingTerminator { command } => Some(*command),
            ParseError::Incomplete | ParseError::BadHeader => None,
        }
    }

    /// Short lowercase name, used in failure lines sent to the host
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::Incomplete => "incomplete",
            ParseError::BadHeader => "bad-header",
            ParseError::UnknownCommand(_) => "unknown-command",
            ParseError::BadField { .. } => "bad-field",
            ParseError::MissingTerminator { .. } => "missing-terminator",
        }
    }
}

/// A host command
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Command<'a> {
    /// `C00`: abort whatever the radio does and listen
    Idle,
    /// `C01`: report the board ID
    GetId,
    /// `C02`: reset the radio and the engine state
    Reset,
    /// `C03`: check the device ID of the radio
    SelfTest,
    /// `C04`: enable or disable passive listening
    SetPassive(bool),
    /// `C05`: range with another board
    Range {
        /// ID of the other board
        target: u8,
        /// Whether the target computes the range too
        target_measures: bool,
        /// Whether to use double-sided ranging
        double_sided: bool,
    },
    /// `C06`: broadcast a DATA frame
    Broadcast(&'a [u8]),
    /// `C07`: report the largest frame the radio handles
    MaxFrameLen,
}

impl<'a> Command<'a> {
    /// Decodes the first command of `input`
    ///
    /// Leading line breaks are skipped. Returns the command and the number of
    /// bytes it took, terminator included.
    pub fn parse(input: &'a [u8]) -> Result<(Self, usize), ParseError> {
        let start = input
            .iter()
            .position(|b| !is_terminator(*b))
            .ok_or(ParseError::Incomplete)?;
        let mut reader = Reader {
            input,
            pos: start,
        };

        let number = reader.header()?;
        let kinds = schema(number).ok_or(ParseError::UnknownCommand(number))?;

        let mut fields: Vec<Value<'a>, MAX_FIELDS> = Vec::new();
        for (index, kind) in kinds.iter().enumerate() {
            let value = reader.field(*kind, number, index)?;
            fields.push(value).map_err(|_| ParseError::BadField {
                command: number,
                index,
            })?;
        }
        reader.terminator(number)?;

        let command = Command::from_fields(number, &fields)?;
        Ok((command, reader.pos))
    }

    /// Number of the command
    pub fn number(&self) -> u8 {
        match self {
            Command::Idle => 0,
            Command::GetId => 1,
            Command::Reset => 2,
            Command::SelfTest => 3,
            Command::SetPassive(_) => 4,
            Command::Range { .. } => 5,
            Command::Broadcast(_) => 6,
            Command::MaxFrameLen => 7,
        }
    }

    fn from_fields(number: u8, fields: &[Value<'a>]) -> Result<Self, ParseError> {
        let bad = |index| ParseError::BadField {
            command: number,
            index,
        };

        let command = match (number, fields) {
            (0, []) => Command::Idle,
            (1, []) => Command::GetId,
            (2, []) => Command::Reset,
            (3, []) => Command::SelfTest,
            (4, [Value::Bool(enabled)]) => Command::SetPassive(*enabled),
            (5, [Value::Int(target), Value::Bool(target_measures), Value::Bool(double_sided)]) => {
                Command::Range {
                    target: u8::try_from(*target).map_err(|_| bad(0))?,
                    target_measures: *target_measures,
                    double_sided: *double_sided,
                }
            }
            (6, [Value::Blob(payload)]) => Command::Broadcast(*payload),
            (7, []) => Command::MaxFrameLen,
            _ => return Err(ParseError::UnknownCommand(number)),
        };
        Ok(command)
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn next(&mut self) -> Result<u8, ParseError> {
        let byte = *self.input.get(self.pos).ok_or(ParseError::Incomplete)?;
        self.pos += 1;
        Ok(byte)
    }

    fn header(&mut self) -> Result<u8, ParseError> {
        if self.next()? != b'C' {
            return Err(ParseError::BadHeader);
        }
        let tens = self.next()?;
        let ones = self.next()?;
        if !tens.is_ascii_digit() || !ones.is_ascii_digit() {
            return Err(ParseError::BadHeader);
        }
        Ok((tens - b'0') * 10 + (ones - b'0'))
    }

    /// Everything up to the next separator or terminator, which is not taken
    fn text(&mut self) -> Result<&'a [u8], ParseError> {
        let rest = &self.input[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == SEPARATOR || is_terminator(*b))
            .ok_or(ParseError::Incomplete)?;
        self.pos += len;
        Ok(&rest[..len])
    }

    fn field(&mut self, kind: FieldKind, command: u8, index: usize) -> Result<Value<'a>, ParseError> {
        let bad = ParseError::BadField { command, index };
        if self.next()? != SEPARATOR {
            return Err(bad);
        }

        match kind {
            FieldKind::Int => {
                let text = self.text()?;
                core::str::from_utf8(text)
                    .ok()
                    .and_then(|text| text.parse().ok())
                    .map(Value::Int)
                    .ok_or(bad)
            }
            FieldKind::Bool => match self.next()? {
                b'0' | 0 => Ok(Value::Bool(false)),
                b'1' | 1 => Ok(Value::Bool(true)),
                _ => Err(bad),
            },
            FieldKind::Float => {
                let value: f32 = self.read(bad)?;
                Ok(Value::Float(value))
            }
            FieldKind::Str => {
                let text = self.text()?;
                core::str::from_utf8(text).map(Value::Str).map_err(|_| bad)
            }
            FieldKind::Blob => {
                let len: u16 = self.read(bad)?;
                let end = self.pos + len as usize;
                let bytes = self.input.get(self.pos..end).ok_or(ParseError::Incomplete)?;
                self.pos = end;
                Ok(Value::Blob(bytes))
            }
        }
    }

    fn read<T>(&mut self, bad: ParseError) -> Result<T, ParseError>
    where
        T: byte::TryRead<'a, byte::ctx::Endian>,
    {
        let input = self.input;
        input
            .read_with(&mut self.pos, LE)
            .map_err(|error| match error {
                byte::Error::Incomplete => ParseError::Incomplete,
                _ => bad,
            })
    }

    fn terminator(&mut self, command: u8) -> Result<(), ParseError> {
        match self.next()? {
            b'\r' => {
                // Swallow the `\n` of a `\r\n` pair if it already arrived
                if self.input.get(self.pos) == Some(&b'\n') {
                    self.pos += 1;
                }
                Ok(())
            }
            b'\n' => Ok(()),
            _ => Err(ParseError::MissingTerminator { command }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_without_fields() {
        assert_eq!(Command::parse(b"C00\r\n"), Ok((Command::Idle, 5)));
        assert_eq!(Command::parse(b"C01\n"), Ok((Command::GetId, 4)));
        assert_eq!(Command::parse(b"C07\r"), Ok((Command::MaxFrameLen, 4)));
    }

    #[test]
    fn leading_line_breaks_are_skipped() {
        assert_eq!(Command::parse(b"\r\n\nC03\r\n"), Ok((Command::SelfTest, 8)));
    }

    #[test]
    fn ranging_command() {
        let (command, len) = Command::parse(b"C05|5|0|1\r\nC00\r\n").unwrap();

        assert_eq!(
            command,
            Command::Range {
                target: 5,
                target_measures: false,
                double_sided: true
            }
        );
        assert_eq!(len, 11);
        assert_eq!(command.number(), 5);
    }

    #[test]
    fn raw_bools() {
        assert_eq!(
            Command::parse(b"C04|\x01\n"),
            Ok((Command::SetPassive(true), 6))
        );
        assert_eq!(
            Command::parse(b"C04|0\n"),
            Ok((Command::SetPassive(false), 6))
        );
        assert_eq!(
            Command::parse(b"C04|x\n"),
            Err(ParseError::BadField {
                command: 4,
                index: 0
            })
        );
    }

    #[test]
    fn blob_may_contain_delimiters() {
        let (command, len) = Command::parse(b"C06|\x04\x00a|\r\n\r\n").unwrap();

        assert_eq!(command, Command::Broadcast(b"a|\r\n"));
        assert_eq!(len, 12);
    }

    #[test]
    fn partial_input_is_incomplete() {
        assert_eq!(Command::parse(b""), Err(ParseError::Incomplete));
        assert_eq!(Command::parse(b"\r\n"), Err(ParseError::Incomplete));
        assert_eq!(Command::parse(b"C0"), Err(ParseError::Incomplete));
        assert_eq!(Command::parse(b"C05|5|0"), Err(ParseError::Incomplete));
        assert_eq!(Command::parse(b"C06|\x04\x00ab"), Err(ParseError::Incomplete));
        assert_eq!(Command::parse(b"C05|12"), Err(ParseError::Incomplete));
    }

    #[test]
    fn malformed_input() {
        assert_eq!(Command::parse(b"X05\r\n"), Err(ParseError::BadHeader));
        assert_eq!(Command::parse(b"C5x\r\n"), Err(ParseError::BadHeader));
        assert_eq!(
            Command::parse(b"C42\r\n"),
            Err(ParseError::UnknownCommand(42))
        );
        assert_eq!(
            Command::parse(b"C05|300|0|0\r\n"),
            Err(ParseError::BadField {
                command: 5,
                index: 0
            })
        );
        assert_eq!(
            Command::parse(b"C05|5|0\r\n"),
            Err(ParseError::BadField {
                command: 5,
                index: 2
            })
        );
        assert_eq!(
            Command::parse(b"C01|1\r\n"),
            Err(ParseError::MissingTerminator { command: 1 })
        );
    }

    #[test]
    fn every_field_kind_decodes() {
        let input = b"|-42|1|\x00\x00\xc0\x3f|hello|\x02\x00hi\n";
        let mut reader = Reader { input, pos: 0 };

        assert_eq!(reader.field(FieldKind::Int, 9, 0), Ok(Value::Int(-42)));
        assert_eq!(reader.field(FieldKind::Bool, 9, 1), Ok(Value::Bool(true)));
        assert_eq!(reader.field(FieldKind::Float, 9, 2), Ok(Value::Float(1.5)));
        assert_eq!(reader.field(FieldKind::Str, 9, 3), Ok(Value::Str("hello")));
        assert_eq!(reader.field(FieldKind::Blob, 9, 4), Ok(Value::Blob(b"hi")));
        assert_eq!(reader.terminator(9), Ok(()));
    }

    #[test]
    fn schema_lookup() {
        assert_eq!(
            schema(5),
            Some(&[FieldKind::Int, FieldKind::Bool, FieldKind::Bool][..])
        );
        assert_eq!(schema(8), None);
        assert_eq!(
            ParseError::BadField {
                command: 5,
                index: 1
            }
            .command(),
            Some(5)
        );
    }
}
