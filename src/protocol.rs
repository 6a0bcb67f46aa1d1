//! Types and constants for the NTP wire format (RFC 5905).
//!
//! Provides `ReadBytes` and `WriteBytes` implementations which extend the byteorder crate
//! `WriteBytesExt` and `ReadBytesExt` traits with the ability to read and write the NTP
//! packet and its component types. All multi-byte fields are converted to and from network
//! byte order explicitly; nothing here depends on host endianness or struct layout.

use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use std::{fmt, io};

/// NTP port number.
pub const PORT: u16 = 123;

/// A trait for writing any of the Network Time Protocol types to network-endian bytes.
///
/// A blanket implementation is provided for all types that implement `byteorder::WriteBytesExt`.
pub trait WriteBytes {
    /// Writes an NTP protocol type to this writer in network byte order.
    fn write_bytes<P: WriteToBytes>(&mut self, protocol: P) -> io::Result<()>;
}

/// A trait for reading any of the Network Time Protocol types from network-endian bytes.
///
/// A blanket implementation is provided for all types that implement `byteorder::ReadBytesExt`.
pub trait ReadBytes {
    /// Reads an NTP protocol type from this reader in network byte order.
    fn read_bytes<P: ReadFromBytes>(&mut self) -> io::Result<P>;
}

/// Network Time Protocol types that may be written to network endian bytes.
pub trait WriteToBytes {
    /// Write the type to bytes.
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()>;
}

/// Network Time Protocol types that may be read from network endian bytes.
pub trait ReadFromBytes: Sized {
    /// Read the type from bytes.
    fn read_from_bytes<R: ReadBytesExt>(reader: R) -> io::Result<Self>;
}

/// Types that have a constant size when written to or read from bytes.
pub trait ConstPackedSizeBytes {
    /// The constant size in bytes when this type is packed for network transmission.
    const PACKED_SIZE_BYTES: usize;
}

/// **NTP Short Format** - Used in the root delay and root dispersion header fields, where
/// the full resolution of the timestamp format is not justified. A 16-bit unsigned seconds
/// field followed by a 16-bit fraction field.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ShortFormat {
    /// Seconds component (16-bit unsigned).
    pub seconds: u16,
    /// Fractional seconds component (16-bit unsigned).
    pub fraction: u16,
}

/// **NTP Timestamp Format** - A 32-bit unsigned seconds field spanning 136 years and a
/// 32-bit fraction field resolving 232 picoseconds.
///
/// The prime epoch is 0 h 1 January 1900 UTC, when all bits are zero. The seconds field
/// wraps every 2^32 seconds; era disambiguation is the concern of the offset computation,
/// not of this type.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TimestampFormat {
    /// Seconds since 1900-01-01 00:00:00 UTC, modulo 2^32.
    pub seconds: u32,
    /// Fractional seconds (32-bit unsigned).
    pub fraction: u32,
}

/// The scale of the 32-bit fraction field: one second is 2^32 units.
const FRACTION_SCALE: f64 = 4_294_967_296.0;

impl TimestampFormat {
    /// The timestamp as a floating-point count of seconds since the NTP prime epoch
    /// (within the current era).
    ///
    /// A `f64` has 53 mantissa bits, which leaves at least 20 fractional bits across the
    /// full 32-bit seconds range, so the conversion stays well under a microsecond of
    /// rounding error even late in an era.
    pub fn to_seconds(self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / FRACTION_SCALE
    }

    /// Build a timestamp from a floating-point count of NTP seconds.
    ///
    /// Seconds are truncated to 32 bits, which is the on-wire behavior at an era boundary.
    pub fn from_seconds(seconds: f64) -> Self {
        let whole = seconds.floor();
        let fraction = ((seconds - whole) * FRACTION_SCALE) as u32;
        TimestampFormat {
            seconds: whole as u64 as u32,
            fraction,
        }
    }

    /// Whether both fields are zero. A zero timestamp in a server reply means "unset".
    pub fn is_zero(self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }
}

/// A 2-bit integer warning of an impending leap second, packed into the first header byte.
///
/// `Unknown` doubles as the "clock unsynchronized" alarm condition; replies carrying it are
/// rejected by the validation layer.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum LeapIndicator {
    /// No leap required.
    #[default]
    NoWarning = 0,
    /// Last minute of the day has 61 seconds.
    AddOne = 1,
    /// Last minute of the day has 59 seconds.
    SubOne = 2,
    /// Clock unsynchronized.
    Unknown = 3,
}

impl LeapIndicator {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => LeapIndicator::NoWarning,
            1 => LeapIndicator::AddOne,
            2 => LeapIndicator::SubOne,
            _ => LeapIndicator::Unknown,
        }
    }
}

/// A 3-bit integer representing the NTP version number, packed into the first header byte.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Version(pub u8);

impl Version {
    /// NTP version 3.
    pub const V3: Self = Version(3);
    /// NTP version 4 (current standard).
    pub const V4: Self = Version(4);

    /// Whether the version is one this client accepts in a server reply.
    pub fn is_acceptable(&self) -> bool {
        *self == Self::V3 || *self == Self::V4
    }
}

/// A 3-bit integer representing the association mode, packed into the first header byte.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    /// Reserved mode (value 0).
    Reserved = 0,
    /// Symmetric active mode (value 1).
    SymmetricActive = 1,
    /// Symmetric passive mode (value 2).
    SymmetricPassive = 2,
    /// Client mode (value 3).
    Client = 3,
    /// Server mode (value 4).
    Server = 4,
    /// Broadcast mode (value 5).
    Broadcast = 5,
    /// NTP control message mode (value 6).
    ControlMessage = 6,
    /// Reserved for private use (value 7).
    ReservedForPrivateUse = 7,
}

impl Mode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => Mode::Reserved,
            1 => Mode::SymmetricActive,
            2 => Mode::SymmetricPassive,
            3 => Mode::Client,
            4 => Mode::Server,
            5 => Mode::Broadcast,
            6 => Mode::ControlMessage,
            _ => Mode::ReservedForPrivateUse,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Reserved => "reserved",
            Mode::SymmetricActive => "symmetric active",
            Mode::SymmetricPassive => "symmetric passive",
            Mode::Client => "client",
            Mode::Server => "server",
            Mode::Broadcast => "broadcast",
            Mode::ControlMessage => "control",
            Mode::ReservedForPrivateUse => "reserved for private use",
        };
        write!(f, "{}", s)
    }
}

/// An 8-bit integer representing the stratum: the server's distance from a reference clock.
///
/// Parsed and reported, but carries no decision weight in this engine.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Stratum(pub u8);

impl Stratum {
    /// Unspecified or invalid.
    pub const UNSPECIFIED: Self = Stratum(0);
    /// The primary server (e.g. equipped with a GPS receiver).
    pub const PRIMARY: Self = Stratum(1);
    /// An unsynchronized stratum.
    pub const UNSYNCHRONIZED: Self = Stratum(16);
}

/// A 4-byte code identifying the particular server or reference clock.
///
/// For stratum 1 this is an ASCII source code; for secondary servers an IPv4 address.
/// The engine carries it opaquely.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ReferenceId(pub [u8; 4]);

/// The consecutive sub-fields of the first packed byte in the NTP packet.
pub type PacketByte1 = (LeapIndicator, Version, Mode);

/// **Packet Header** - The 48-byte fixed-layout NTP packet.
///
/// ```ignore
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |LI | VN  |Mode |    Stratum     |     Poll      |  Precision   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Root Delay                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Root Dispersion                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Reference ID                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                     Reference Timestamp (64)                  +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      Origin Timestamp (64)                    +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      Receive Timestamp (64)                   +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      Transmit Timestamp (64)                  +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Packet {
    /// Leap indicator warning of impending leap second.
    pub leap_indicator: LeapIndicator,
    /// NTP protocol version number.
    pub version: Version,
    /// Association mode (client, server, broadcast, etc.).
    pub mode: Mode,
    /// Stratum level of the time source.
    pub stratum: Stratum,
    /// Maximum interval between successive messages, in log2 seconds.
    pub poll: i8,
    /// Precision of the system clock, in log2 seconds.
    pub precision: i8,
    /// Total round-trip delay to the reference clock, in NTP short format.
    pub root_delay: ShortFormat,
    /// Total dispersion to the reference clock, in NTP short format.
    pub root_dispersion: ShortFormat,
    /// Reference clock identifier.
    pub reference_id: ReferenceId,
    /// Time when the server clock was last set or corrected.
    pub reference_timestamp: TimestampFormat,
    /// Time at the client when the request departed for the server (T1).
    pub origin_timestamp: TimestampFormat,
    /// Time at the server when the request arrived from the client (T2).
    pub receive_timestamp: TimestampFormat,
    /// Time at the server when the response left for the client (T3).
    pub transmit_timestamp: TimestampFormat,
}

impl Packet {
    /// Build an outgoing client request.
    ///
    /// Every field is zero except the protocol version, the client mode, and the transmit
    /// timestamp, which the caller stamps with the current time (it becomes T1 of the
    /// exchange and must be echoed back in the reply's origin field).
    pub fn client_request(transmit_timestamp: TimestampFormat) -> Packet {
        Packet {
            leap_indicator: LeapIndicator::NoWarning,
            version: Version::V4,
            mode: Mode::Client,
            stratum: Stratum::UNSPECIFIED,
            poll: 0,
            precision: 0,
            root_delay: ShortFormat::default(),
            root_dispersion: ShortFormat::default(),
            reference_id: ReferenceId::default(),
            reference_timestamp: TimestampFormat::default(),
            origin_timestamp: TimestampFormat::default(),
            receive_timestamp: TimestampFormat::default(),
            transmit_timestamp,
        }
    }
}

// Size implementations.

impl ConstPackedSizeBytes for ShortFormat {
    const PACKED_SIZE_BYTES: usize = 4;
}

impl ConstPackedSizeBytes for TimestampFormat {
    const PACKED_SIZE_BYTES: usize = 8;
}

impl ConstPackedSizeBytes for Stratum {
    const PACKED_SIZE_BYTES: usize = 1;
}

impl ConstPackedSizeBytes for ReferenceId {
    const PACKED_SIZE_BYTES: usize = 4;
}

impl ConstPackedSizeBytes for PacketByte1 {
    const PACKED_SIZE_BYTES: usize = 1;
}

impl ConstPackedSizeBytes for Packet {
    const PACKED_SIZE_BYTES: usize = PacketByte1::PACKED_SIZE_BYTES
        + Stratum::PACKED_SIZE_BYTES
        + 2
        + ShortFormat::PACKED_SIZE_BYTES * 2
        + ReferenceId::PACKED_SIZE_BYTES
        + TimestampFormat::PACKED_SIZE_BYTES * 4;
}

// The wire format is fixed at 48 bytes; anything else is a defect in the layout above.
const _: [(); 48] = [(); Packet::PACKED_SIZE_BYTES];

// Writer implementations.

impl<W> WriteBytes for W
where
    W: WriteBytesExt,
{
    fn write_bytes<P: WriteToBytes>(&mut self, protocol: P) -> io::Result<()> {
        protocol.write_to_bytes(self)
    }
}

impl<P> WriteToBytes for &P
where
    P: WriteToBytes,
{
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()> {
        (*self).write_to_bytes(writer)
    }
}

impl WriteToBytes for ShortFormat {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<BE>(self.seconds)?;
        writer.write_u16::<BE>(self.fraction)?;
        Ok(())
    }
}

impl WriteToBytes for TimestampFormat {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<BE>(self.seconds)?;
        writer.write_u32::<BE>(self.fraction)?;
        Ok(())
    }
}

impl WriteToBytes for Stratum {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.0)?;
        Ok(())
    }
}

impl WriteToBytes for ReferenceId {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }
}

impl WriteToBytes for (LeapIndicator, Version, Mode) {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        let (li, vn, mode) = *self;
        let mut li_vn_mode = 0;
        li_vn_mode |= (li as u8) << 6;
        li_vn_mode |= (vn.0 & 0b111) << 3;
        li_vn_mode |= mode as u8;
        writer.write_u8(li_vn_mode)?;
        Ok(())
    }
}

impl WriteToBytes for Packet {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        let li_vn_mode = (self.leap_indicator, self.version, self.mode);
        writer.write_bytes(li_vn_mode)?;
        writer.write_bytes(self.stratum)?;
        writer.write_i8(self.poll)?;
        writer.write_i8(self.precision)?;
        writer.write_bytes(self.root_delay)?;
        writer.write_bytes(self.root_dispersion)?;
        writer.write_bytes(self.reference_id)?;
        writer.write_bytes(self.reference_timestamp)?;
        writer.write_bytes(self.origin_timestamp)?;
        writer.write_bytes(self.receive_timestamp)?;
        writer.write_bytes(self.transmit_timestamp)?;
        Ok(())
    }
}

// Reader implementations.

impl<R> ReadBytes for R
where
    R: ReadBytesExt,
{
    fn read_bytes<P: ReadFromBytes>(&mut self) -> io::Result<P> {
        P::read_from_bytes(self)
    }
}

impl ReadFromBytes for ShortFormat {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let seconds = reader.read_u16::<BE>()?;
        let fraction = reader.read_u16::<BE>()?;
        Ok(ShortFormat { seconds, fraction })
    }
}

impl ReadFromBytes for TimestampFormat {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let seconds = reader.read_u32::<BE>()?;
        let fraction = reader.read_u32::<BE>()?;
        Ok(TimestampFormat { seconds, fraction })
    }
}

impl ReadFromBytes for Stratum {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        Ok(Stratum(reader.read_u8()?))
    }
}

impl ReadFromBytes for ReferenceId {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let mut bytes = [0u8; 4];
        reader.read_exact(&mut bytes)?;
        Ok(ReferenceId(bytes))
    }
}

impl ReadFromBytes for (LeapIndicator, Version, Mode) {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let li_vn_mode = reader.read_u8()?;
        let li = LeapIndicator::from_bits(li_vn_mode >> 6);
        let vn = Version((li_vn_mode >> 3) & 0b111);
        let mode = Mode::from_bits(li_vn_mode);
        Ok((li, vn, mode))
    }
}

impl ReadFromBytes for Packet {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let (leap_indicator, version, mode) = reader.read_bytes()?;
        let stratum = reader.read_bytes()?;
        let poll = reader.read_i8()?;
        let precision = reader.read_i8()?;
        let root_delay = reader.read_bytes()?;
        let root_dispersion = reader.read_bytes()?;
        let reference_id = reader.read_bytes()?;
        let reference_timestamp = reader.read_bytes()?;
        let origin_timestamp = reader.read_bytes()?;
        let receive_timestamp = reader.read_bytes()?;
        let transmit_timestamp = reader.read_bytes()?;
        Ok(Packet {
            leap_indicator,
            version,
            mode,
            stratum,
            poll,
            precision,
            root_delay,
            root_dispersion,
            reference_id,
            reference_timestamp,
            origin_timestamp,
            receive_timestamp,
            transmit_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_byte_roundtrip_all_combinations() {
        for li_bits in 0u8..4 {
            for vn_bits in 0u8..8 {
                for mode_bits in 0u8..8 {
                    let byte1 = (
                        LeapIndicator::from_bits(li_bits),
                        Version(vn_bits),
                        Mode::from_bits(mode_bits),
                    );
                    let mut buf = [0u8; 1];
                    (&mut buf[..]).write_bytes(byte1).unwrap();
                    assert_eq!(buf[0], (li_bits << 6) | (vn_bits << 3) | mode_bits);
                    let decoded: PacketByte1 = (&buf[..]).read_bytes().unwrap();
                    assert_eq!(decoded, byte1);
                }
            }
        }
    }

    #[test]
    fn packed_byte_subfields_do_not_clobber_each_other() {
        let byte1 = (LeapIndicator::SubOne, Version::V4, Mode::Server);
        let mut buf = [0u8; 1];
        (&mut buf[..]).write_bytes(byte1).unwrap();
        // LI=2, VN=4, Mode=4 -> 0b10_100_100
        assert_eq!(buf[0], 0b1010_0100);
    }

    #[test]
    fn timestamp_seconds_roundtrip() {
        let ts = TimestampFormat {
            seconds: 3_913_056_000,
            fraction: 0x8000_0000, // exactly half a second
        };
        let secs = ts.to_seconds();
        assert!((secs - 3_913_056_000.5).abs() < 1e-9);
        let back = TimestampFormat::from_seconds(secs);
        assert_eq!(back.seconds, ts.seconds);
        // One unit of fraction is ~233ps; allow a couple for f64 rounding.
        assert!((back.fraction as i64 - ts.fraction as i64).abs() <= 2);
    }

    #[test]
    fn from_seconds_truncates_at_era_boundary() {
        let ts = TimestampFormat::from_seconds(FRACTION_SCALE + 5.0);
        assert_eq!(ts.seconds, 5);
    }

    #[test]
    fn client_request_zeroes_everything_but_version_mode_transmit() {
        let now = TimestampFormat {
            seconds: 123,
            fraction: 456,
        };
        let packet = Packet::client_request(now);
        assert_eq!(packet.leap_indicator, LeapIndicator::NoWarning);
        assert_eq!(packet.version, Version::V4);
        assert_eq!(packet.mode, Mode::Client);
        assert_eq!(packet.stratum, Stratum::UNSPECIFIED);
        assert_eq!(packet.poll, 0);
        assert_eq!(packet.precision, 0);
        assert!(packet.origin_timestamp.is_zero());
        assert!(packet.receive_timestamp.is_zero());
        assert!(packet.reference_timestamp.is_zero());
        assert_eq!(packet.transmit_timestamp, now);

        let mut buf = [0u8; Packet::PACKED_SIZE_BYTES];
        (&mut buf[..]).write_bytes(packet).unwrap();
        // First byte: LI=0, VN=4, Mode=3.
        assert_eq!(buf[0], 0b0010_0011);
    }
}
