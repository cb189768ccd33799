use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Audio files table - one row per uploaded recording, the unit of claim
#[derive(Iden)]
pub enum AudioFiles {
    Table,
    Id,
    Filename,
    FilePath,
    Status,
    ClaimedBy,
    ExpectedSegments,
    IngestedAt,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

/// Audio segments table - VAD clips of an audio file
#[derive(Iden)]
pub enum AudioSegments {
    Table,
    Id,
    AudioId,
    ClipIndex,
    FilePath,
    Duration,
    CreatedAt,
    DeletedAt,
}

/// Transcripts table - one editable annotation per segment
#[derive(Iden)]
pub enum Transcripts {
    Table,
    Id,
    SegmentId,
    UserId,
    AiText,
    TranscribeText,
    ReportText,
    Emotion,
    Status,
    CreatedAt,
    UpdatedAt,
    ViewedAt,
    DeletedAt,
}
