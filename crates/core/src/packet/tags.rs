pub const PAYLOAD_DELIMITER: char = ',';
pub const PACKET_DELIMITER: char = '\n';

/// Data-port value a device reports in HELLO_HOST when it is free to connect.
pub const EMOTIBIT_AVAILABLE: i32 = -1;

pub mod type_tag {
    // Biometric
    pub const EDA: &str = "EA";
    pub const EDL: &str = "EL";
    pub const EDR: &str = "ER";
    pub const PPG_INFRARED: &str = "PI";
    pub const PPG_RED: &str = "PR";
    pub const PPG_GREEN: &str = "PG";
    pub const SPO2: &str = "O2";
    pub const TEMPERATURE_0: &str = "T0";
    pub const TEMPERATURE_1: &str = "T1";
    pub const THERMOPILE: &str = "TH";
    pub const HUMIDITY_0: &str = "H0";
    pub const ACCELEROMETER_X: &str = "AX";
    pub const ACCELEROMETER_Y: &str = "AY";
    pub const ACCELEROMETER_Z: &str = "AZ";
    pub const GYROSCOPE_X: &str = "GX";
    pub const GYROSCOPE_Y: &str = "GY";
    pub const GYROSCOPE_Z: &str = "GZ";
    pub const MAGNETOMETER_X: &str = "MX";
    pub const MAGNETOMETER_Y: &str = "MY";
    pub const MAGNETOMETER_Z: &str = "MZ";
    pub const BATTERY_VOLTAGE: &str = "BV";
    pub const BATTERY_PERCENT: &str = "B%";
    pub const BUTTON_PRESS_SHORT: &str = "BS";
    pub const BUTTON_PRESS_LONG: &str = "BL";

    // Device state
    pub const DATA_CLIPPING: &str = "DC";
    pub const DATA_OVERFLOW: &str = "DO";
    pub const SD_CARD_ERROR: &str = "SD";
    pub const RESET: &str = "RS";
    pub const EMOTIBIT_DEBUG: &str = "DB";
    pub const ACK: &str = "AK";
    pub const NACK: &str = "NK";
    pub const REQUEST_DATA: &str = "RD";
    pub const TIMESTAMP_EMOTIBIT: &str = "TE";
    pub const TIMESTAMP_LOCAL: &str = "TL";
    pub const TIMESTAMP_UTC: &str = "TU";
    pub const TIMESTAMP_CROSS_TIME: &str = "TX";
    pub const EMOTIBIT_MODE: &str = "EM";
    pub const EMOTIBIT_INFO: &str = "EI";

    // Derived metrics
    pub const HEART_RATE: &str = "HR";
    pub const INTER_HEARTBEAT_INTERVAL: &str = "BI";
    pub const SCR_AMPLITUDE: &str = "SA";
    pub const SCR_FREQUENCY: &str = "SF";
    pub const SCR_RISE_TIME: &str = "SR";

    // Host to device
    pub const RECORD_BEGIN: &str = "RB";
    pub const RECORD_END: &str = "RE";
    pub const USER_NOTE: &str = "UN";
    pub const MODE_NORMAL_POWER: &str = "MN";
    pub const MODE_LOW_POWER: &str = "ML";
    pub const MODE_MAX_LOW_POWER: &str = "MM";
    pub const MODE_WIRELESS_OFF: &str = "MO";
    pub const MODE_HIBERNATE: &str = "MH";
    pub const EMOTIBIT_CONNECT: &str = "EC";
    pub const EMOTIBIT_DISCONNECT: &str = "ED";
    pub const SERIAL_DATA_ON: &str = "S+";
    pub const SERIAL_DATA_OFF: &str = "S-";

    // Advertising
    pub const HELLO_EMOTIBIT: &str = "HE";
    pub const HELLO_HOST: &str = "HH";
    pub const PING: &str = "PN";
    pub const PONG: &str = "PO";

    // WiFi credentials
    pub const WIFI_ADD: &str = "WA";
    pub const WIFI_DELETE: &str = "WD";
    pub const LIST: &str = "LS";
}

pub mod payload_label {
    pub const CONTROL_PORT: &str = "CP";
    pub const DATA_PORT: &str = "DP";
    pub const DEVICE_ID: &str = "DI";
    pub const RECORDING_STATUS: &str = "RS";
    pub const POWER_STATUS: &str = "PS";
    pub const LSL_MARKER_RX_TIMESTAMP: &str = "LR";
    pub const LSL_MARKER_SRC_TIMESTAMP: &str = "LM";
    pub const LSL_LOCAL_CLOCK_TIMESTAMP: &str = "LC";
    pub const LSL_MARKER_DATA: &str = "LD";
}
