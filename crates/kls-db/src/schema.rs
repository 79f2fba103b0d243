//! Database schema definition.

/// Applied on every open; all statements are idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS DatabaseMetadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS Positions (
    id INTEGER PRIMARY KEY,
    line INTEGER NOT NULL,
    character INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS Ranges (
    id INTEGER PRIMARY KEY,
    start INTEGER NOT NULL REFERENCES Positions(id) ON DELETE CASCADE,
    "end" INTEGER NOT NULL REFERENCES Positions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS Locations (
    id INTEGER PRIMARY KEY,
    uri TEXT NOT NULL CHECK (length(uri) <= 511),
    range INTEGER NOT NULL REFERENCES Ranges(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS Symbols (
    id INTEGER PRIMARY KEY,
    fqname TEXT NOT NULL CHECK (length(fqname) <= 255),
    shortname TEXT NOT NULL CHECK (length(shortname) <= 80),
    kind TEXT NOT NULL,
    visibility TEXT NOT NULL,
    extensionreceivertype TEXT,
    location INTEGER REFERENCES Locations(id) ON DELETE SET NULL,
    sourcejar TEXT,
    moduleid TEXT
);

CREATE INDEX IF NOT EXISTS idx_symbols_fqname ON Symbols(fqname);
CREATE INDEX IF NOT EXISTS idx_symbols_shortname ON Symbols(shortname);
CREATE INDEX IF NOT EXISTS idx_symbols_sourcejar ON Symbols(sourcejar);

CREATE TABLE IF NOT EXISTS SymbolIndexMetadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    buildfileversion INTEGER NOT NULL,
    indexedat INTEGER NOT NULL,
    symbolcount INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS IndexedJars (
    id INTEGER PRIMARY KEY,
    jarpath TEXT NOT NULL UNIQUE,
    indexedat INTEGER NOT NULL,
    symbolcount INTEGER NOT NULL
);
"#;
