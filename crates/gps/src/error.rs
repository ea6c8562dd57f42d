//! Error types of the signal generator.

/// Errors raised while configuring or running the signal generator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Free-form error message.
    #[error("{0}")]
    Msg(String),
    /// The navigation file contained no usable ephemeris records.
    #[error("no ephemeris available")]
    NoEphemeris,
    /// A navigation file was never supplied to the builder.
    #[error("GPS ephemeris file is not specified")]
    NavigationNotSet,
    /// No ephemeris set brackets the requested start time.
    #[error("no current set of ephemerides has been found")]
    NoCurrentEphemerides,
    /// The requested start lies outside the span of the navigation file.
    #[error("invalid start time, outside the ephemeris range")]
    InvalidStartTime,
    /// The almanac reference time is more than four weeks away from the
    /// scenario start.
    #[error("invalid time of almanac")]
    InvalidAlmanacTime,
    /// An input file failed to parse.
    #[error("parsing error: {0}")]
    ParsingError(String),
    /// More than one positioning source was configured.
    #[error("positioning method already set")]
    DuplicatePosition,
    /// The positioning source produced no positions.
    #[error("no receiver positions available")]
    WrongPositions,
    /// Negative scenario duration.
    #[error("invalid duration, must be non-negative")]
    InvalidDuration,
    /// Unsupported I/Q sample width.
    #[error("invalid data format, must be 8 or 16 bits")]
    InvalidDataFormat,
    /// No I/Q sample width configured.
    #[error("data format is not set")]
    DataFormatNotSet,
    /// Sampling frequency below the usable minimum.
    #[error("invalid sampling frequency, must be at least 1 MHz")]
    InvalidSamplingFrequency,
    /// Leap event day-of-week outside 1..=7.
    #[error("invalid GPS day number, must be 1..=7")]
    InvalidGpsDay,
    /// Negative leap event week number.
    #[error("invalid GPS week number")]
    InvalidGpsWeek,
    /// Leap second delta outside the eight-bit field.
    #[error("invalid delta leap second, must be -128..=127")]
    InvalidDeltaLeapSecond,
    /// Remote navigation data retrieval is a collaborator concern.
    #[error("remote fetch requested but no fetcher is wired in; supply a local file")]
    RemoteFetchUnavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rinex(#[from] rinex::Error),
    #[error(transparent)]
    Geometry(#[from] geometry::Error),
    #[error("sample buffer pool: {0}")]
    BufferPool(#[from] fifo::CreateError),
    #[error(transparent)]
    DateTime(#[from] jiff::Error),
    #[error(transparent)]
    ParseInt(#[from] std::num::ParseIntError),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
}

impl Error {
    /// Builds a free-form error message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Msg(message.into())
    }

    pub fn navigation_not_set() -> Self {
        Self::NavigationNotSet
    }

    pub fn no_current_ephemerides() -> Self {
        Self::NoCurrentEphemerides
    }

    pub fn invalid_start_time() -> Self {
        Self::InvalidStartTime
    }

    pub fn duplicate_position() -> Self {
        Self::DuplicatePosition
    }

    pub fn wrong_positions() -> Self {
        Self::WrongPositions
    }

    pub fn invalid_duration() -> Self {
        Self::InvalidDuration
    }

    pub fn invalid_data_format() -> Self {
        Self::InvalidDataFormat
    }

    pub fn data_format_not_set() -> Self {
        Self::DataFormatNotSet
    }

    pub fn invalid_sampling_frequency() -> Self {
        Self::InvalidSamplingFrequency
    }

    pub fn invalid_gps_day() -> Self {
        Self::InvalidGpsDay
    }

    pub fn invalid_gps_week() -> Self {
        Self::InvalidGpsWeek
    }

    pub fn invalid_delta_leap_second() -> Self {
        Self::InvalidDeltaLeapSecond
    }
}
