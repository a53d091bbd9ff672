//! Database schema and migrations
//!
//! Reference tables (users, subcategories, criteria, contestants, judge
//! assignments) are written by the contest CRUD service; only the scoring
//! tables are mutated from here.

use anyhow::Result;
use deadpool_postgres::Object;
use tracing::info;

pub async fn run_migrations(client: &Object) -> Result<()> {
    client.batch_execute(SCHEMA_SQL).await?;
    info!("Scoring database migrations applied");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Users as seen by the scoring core (identity and role only)
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    role VARCHAR(32) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS subcategories (
    id UUID PRIMARY KEY,
    event_id UUID,
    name VARCHAR(255) NOT NULL
);

CREATE TABLE IF NOT EXISTS criteria (
    id UUID PRIMARY KEY,
    subcategory_id UUID NOT NULL REFERENCES subcategories(id) ON DELETE CASCADE,
    name VARCHAR(255) NOT NULL,
    max_score DOUBLE PRECISION NOT NULL CHECK (max_score >= 0),
    order_index INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_criteria_subcategory ON criteria(subcategory_id);

CREATE TABLE IF NOT EXISTS contestants (
    id UUID PRIMARY KEY,
    contestant_number INTEGER NOT NULL,
    name VARCHAR(255) NOT NULL
);

CREATE TABLE IF NOT EXISTS subcategory_contestants (
    subcategory_id UUID NOT NULL REFERENCES subcategories(id) ON DELETE CASCADE,
    contestant_id UUID NOT NULL REFERENCES contestants(id) ON DELETE CASCADE,
    PRIMARY KEY (subcategory_id, contestant_id)
);

CREATE TABLE IF NOT EXISTS judge_assignments (
    subcategory_id UUID NOT NULL REFERENCES subcategories(id) ON DELETE CASCADE,
    judge_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    is_certified BOOLEAN NOT NULL DEFAULT FALSE,
    certified_at TIMESTAMPTZ,
    certified_by UUID,
    PRIMARY KEY (subcategory_id, judge_id)
);

-- One score per (judge, criterion, contestant)
CREATE TABLE IF NOT EXISTS scores (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    judge_id UUID NOT NULL REFERENCES users(id),
    criterion_id UUID NOT NULL REFERENCES criteria(id) ON DELETE CASCADE,
    contestant_id UUID NOT NULL REFERENCES contestants(id) ON DELETE CASCADE,
    subcategory_id UUID NOT NULL REFERENCES subcategories(id) ON DELETE CASCADE,
    value DOUBLE PRECISION NOT NULL CHECK (value >= 0),
    comment TEXT,
    is_signed BOOLEAN NOT NULL DEFAULT FALSE,
    signed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (judge_id, criterion_id, contestant_id)
);

CREATE INDEX IF NOT EXISTS idx_scores_subcategory ON scores(subcategory_id);
CREATE INDEX IF NOT EXISTS idx_scores_contestant ON scores(contestant_id, subcategory_id);
CREATE INDEX IF NOT EXISTS idx_scores_judge ON scores(judge_id);

-- Append-only penalties
CREATE TABLE IF NOT EXISTS deductions (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    subcategory_id UUID NOT NULL REFERENCES subcategories(id) ON DELETE CASCADE,
    contestant_id UUID NOT NULL REFERENCES contestants(id) ON DELETE CASCADE,
    amount DOUBLE PRECISION NOT NULL CHECK (amount > 0),
    reason TEXT NOT NULL,
    comment TEXT,
    created_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_deductions_contestant ON deductions(contestant_id, subcategory_id);

-- Terminal auditor sign-off, one per subcategory
CREATE TABLE IF NOT EXISTS final_certifications (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    subcategory_id UUID NOT NULL UNIQUE REFERENCES subcategories(id) ON DELETE CASCADE,
    certified_by UUID NOT NULL,
    notes TEXT,
    certified_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Audit trail
CREATE TABLE IF NOT EXISTS audit_events (
    id BIGSERIAL PRIMARY KEY,
    event_type VARCHAR(64) NOT NULL,
    entity_type VARCHAR(64),
    entity_id VARCHAR(128),
    actor_id UUID,
    actor_role VARCHAR(32),
    payload JSONB,
    success BOOLEAN NOT NULL DEFAULT TRUE,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_audit_events_type ON audit_events(event_type);
CREATE INDEX IF NOT EXISTS idx_audit_events_entity ON audit_events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_audit_events_created ON audit_events(created_at DESC);
"#;
