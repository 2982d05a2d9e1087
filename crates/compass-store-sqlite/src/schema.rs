//! SQL schema for the Compass SQLite store.
//!
//! Executed once at connection startup. Every statement is idempotent.

pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tenants (
    id          TEXT PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    tenant_type TEXT NOT NULL,   -- 'account' | 'subaccount' | 'customer'
    region      TEXT,
    parent      TEXT
);

CREATE TABLE IF NOT EXISTS applications (
    id        TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runtimes (
    id        TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runtime_contexts (
    id         TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL,
    runtime_id TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS labels (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    object_type TEXT NOT NULL,
    object_id   TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,   -- JSON
    UNIQUE (tenant_id, object_type, object_id, key)
);

CREATE TABLE IF NOT EXISTS automatic_scenario_assignments (
    tenant_id        TEXT NOT NULL,
    scenario_name    TEXT NOT NULL,
    target_tenant_id TEXT NOT NULL,
    PRIMARY KEY (tenant_id, scenario_name)
);

CREATE TABLE IF NOT EXISTS formation_templates (
    id                         TEXT PRIMARY KEY,
    name                       TEXT NOT NULL,
    application_types          TEXT NOT NULL DEFAULT '[]',
    runtime_types              TEXT NOT NULL DEFAULT '[]',
    callback_participant_types TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS formation_constraints (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    constraint_type  TEXT NOT NULL,   -- 'PRE' | 'POST'
    target_operation TEXT NOT NULL,
    operator         TEXT NOT NULL,
    resource_type    TEXT NOT NULL,
    resource_subtype TEXT NOT NULL,
    input_template   TEXT NOT NULL,   -- JSON object
    constraint_scope TEXT NOT NULL,
    priority         INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS formation_template_constraint_references (
    formation_template_id TEXT NOT NULL
        REFERENCES formation_templates(id) ON DELETE CASCADE,
    constraint_id         TEXT NOT NULL
        REFERENCES formation_constraints(id) ON DELETE CASCADE,
    PRIMARY KEY (formation_template_id, constraint_id)
);

CREATE TABLE IF NOT EXISTS formations (
    id                    TEXT PRIMARY KEY,
    name                  TEXT NOT NULL,
    formation_template_id TEXT NOT NULL,
    tenant_id             TEXT NOT NULL,
    state                 TEXT NOT NULL,
    error                 TEXT,
    created_at            TEXT NOT NULL,
    UNIQUE (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS formation_assignments (
    id            TEXT PRIMARY KEY,
    formation_id  TEXT NOT NULL,
    tenant_id     TEXT NOT NULL,
    source        TEXT NOT NULL,
    source_type   TEXT NOT NULL,
    target        TEXT NOT NULL,
    target_type   TEXT NOT NULL,
    state         TEXT NOT NULL,
    value         TEXT,            -- JSON or NULL
    error_message TEXT,
    error_code    TEXT,            -- 'TECHNICAL_ERROR' | 'CLIENT_ERROR'
    UNIQUE (formation_id, source, target)
);

CREATE INDEX IF NOT EXISTS labels_object_idx        ON labels(object_type, object_id);
CREATE INDEX IF NOT EXISTS constraints_location_idx ON formation_constraints(target_operation, constraint_type);
CREATE INDEX IF NOT EXISTS assignments_formation_idx ON formation_assignments(formation_id);
CREATE INDEX IF NOT EXISTS assignments_state_idx     ON formation_assignments(state);

PRAGMA user_version = 1;
";
