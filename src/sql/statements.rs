//! SQL text used by the eventstore and the projection bookkeeping
//! tables. Kept in one place so the schema reads top to bottom.

/// The append-only event log. `position` comes from a dedicated sequence
/// once per push transaction; `in_position_order` disambiguates events
/// written in the same transaction.
pub const CREATE_EVENTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS events
    (
      id uuid NOT NULL,
      event_type TEXT NOT NULL,
      aggregate_type TEXT NOT NULL,
      aggregate_id TEXT NOT NULL,
      aggregate_version BIGINT NOT NULL,
      event_data jsonb NOT NULL,
      editor_user TEXT NOT NULL,
      resource_owner TEXT NOT NULL,
      instance_id TEXT NOT NULL,
      position BIGINT NOT NULL,
      in_position_order INT NOT NULL DEFAULT 0,
      creation_date TIMESTAMPTZ NOT NULL DEFAULT current_timestamp,
      revision SMALLINT NOT NULL DEFAULT 1,
      CONSTRAINT events_pkey PRIMARY KEY (id)
    )";

pub const CREATE_EVENTS_POSITION_SEQUENCE: &str = "CREATE SEQUENCE IF NOT EXISTS events_position_seq";

pub const CREATE_EVENTS_AGGREGATE_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS events_aggregate_version
    ON events (instance_id, aggregate_type, aggregate_id, aggregate_version)";

pub const CREATE_EVENTS_POSITION_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS events_position
    ON events (position, in_position_order)";

pub const CREATE_EVENTS_TYPE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS events_event_type ON events (instance_id, event_type)";

/// Per-projection position cursor.
pub const CREATE_PROJECTION_STATES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS projection_states
    (
      projection_name TEXT NOT NULL,
      instance_id TEXT NOT NULL DEFAULT '',
      position BIGINT NOT NULL DEFAULT 0,
      in_position_order INT NOT NULL DEFAULT 0,
      last_updated TIMESTAMPTZ NOT NULL DEFAULT current_timestamp,
      CONSTRAINT projection_states_pkey PRIMARY KEY (projection_name, instance_id)
    )";

/// Poison events, one row per `(projection, position)`.
pub const CREATE_PROJECTION_FAILED_EVENTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS projection_failed_events
    (
      id uuid NOT NULL DEFAULT gen_random_uuid(),
      projection_name TEXT NOT NULL,
      failed_sequence BIGINT NOT NULL,
      failed_in_position_order INT NOT NULL DEFAULT 0,
      failure_count INT NOT NULL DEFAULT 1,
      error TEXT NOT NULL,
      event_data jsonb NOT NULL,
      last_failed TIMESTAMPTZ NOT NULL DEFAULT current_timestamp,
      instance_id TEXT NOT NULL DEFAULT '',
      CONSTRAINT projection_failed_events_pkey PRIMARY KEY (id),
      CONSTRAINT projection_failed_events_unique UNIQUE (projection_name, failed_sequence, failed_in_position_order)
    )";

/// All read-model tables live in the `projections` schema.
pub const CREATE_PROJECTIONS_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS projections";

/// Shared key-value table backing sessions, refresh-token bookkeeping and
/// revocations when a replica-shared store is required.
pub const CREATE_KV_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS kv
    (
      key TEXT NOT NULL,
      value jsonb NOT NULL,
      expires_at TIMESTAMPTZ,
      CONSTRAINT kv_pkey PRIMARY KEY (key)
    )";

pub const INSERT_EVENT: &str = "
    INSERT INTO events
    (id, event_type, aggregate_type, aggregate_id, aggregate_version, event_data,
     editor_user, resource_owner, instance_id, position, in_position_order, creation_date, revision)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

pub const NEXT_POSITION: &str = "SELECT nextval('events_position_seq')";

/// Head event of one aggregate, locked for the duration of the append
/// transaction so concurrent writers serialize.
pub const SELECT_HEAD_FOR_UPDATE: &str = "
    SELECT aggregate_version FROM events
    WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
    ORDER BY aggregate_version DESC
    LIMIT 1
    FOR UPDATE";

pub const SELECT_BY_AGGREGATE: &str = "
    SELECT * FROM events
    WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
    ORDER BY aggregate_version ASC";

pub const SELECT_LATEST_BY_AGGREGATE: &str = "
    SELECT * FROM events
    WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
    ORDER BY aggregate_version DESC
    LIMIT 1";

pub const SELECT_AFTER_POSITION: &str = "
    SELECT * FROM events
    WHERE (position, in_position_order) > ($1, $2)
    ORDER BY position ASC, in_position_order ASC
    LIMIT $3";

pub const SELECT_MAX_POSITION: &str = "SELECT COALESCE(MAX(position), 0) FROM events";

/// The newest `(position, in_position_order)` pair in the log. Because
/// appends serialize on the position lock, everything at or before this
/// pair is committed and visible.
pub const SELECT_HEAD_POSITION: &str = "
    SELECT position, in_position_order FROM events
    ORDER BY position DESC, in_position_order DESC
    LIMIT 1";

pub const SELECT_ALL_ORDERED: &str = "SELECT * FROM events ORDER BY position ASC, in_position_order ASC";

pub const UPSERT_PROJECTION_STATE: &str = "
    INSERT INTO projection_states (projection_name, instance_id, position, in_position_order, last_updated)
    VALUES ($1, $2, $3, $4, current_timestamp)
    ON CONFLICT (projection_name, instance_id)
    DO UPDATE SET position = $3, in_position_order = $4, last_updated = current_timestamp";

pub const SELECT_PROJECTION_STATE: &str = "
    SELECT position, in_position_order FROM projection_states
    WHERE projection_name = $1 AND instance_id = $2";

pub const RESET_PROJECTION_STATE: &str = "
    DELETE FROM projection_states WHERE projection_name = $1 AND instance_id = $2";

pub const UPSERT_FAILED_EVENT: &str = "
    INSERT INTO projection_failed_events
    (projection_name, failed_sequence, failed_in_position_order, failure_count, error, event_data, last_failed, instance_id)
    VALUES ($1, $2, $3, 1, $4, $5, current_timestamp, $6)
    ON CONFLICT (projection_name, failed_sequence, failed_in_position_order)
    DO UPDATE SET failure_count = projection_failed_events.failure_count + 1,
                  error = $4,
                  last_failed = current_timestamp";

pub const SELECT_FAILED_EVENTS: &str = "
    SELECT projection_name, failed_sequence, failed_in_position_order, failure_count, error, event_data, last_failed, instance_id
    FROM projection_failed_events
    WHERE projection_name = $1
    ORDER BY failed_sequence ASC, failed_in_position_order ASC";
