#![allow(dead_code)]

use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;

/// One raw trip with valid defaults; tests override what they exercise.
#[derive(Debug, Clone)]
pub struct Trip {
    pub vendor_id: Option<i64>,
    pub pickup: NaiveDateTime,
    pub minutes: i64,
    pub passenger_count: Option<i64>,
    pub trip_distance: Option<f64>,
    pub ratecode_id: Option<i64>,
    pub store_and_fwd: &'static str,
    pub pickup_location_id: Option<i64>,
    pub dropoff_location_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub fare_amount: Option<f64>,
    pub tip_amount: Option<f64>,
    pub airport_fee: Option<f64>,
    pub congestion_surcharge: Option<f64>,
}

pub fn at(timestamp: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").expect("valid timestamp")
}

pub fn trip(pickup: &str, minutes: i64) -> Trip {
    Trip {
        vendor_id: Some(1),
        pickup: at(pickup),
        minutes,
        passenger_count: Some(1),
        trip_distance: Some(1.5),
        ratecode_id: Some(1),
        store_and_fwd: "N",
        pickup_location_id: Some(1),
        dropoff_location_id: Some(2),
        payment_id: Some(1),
        fare_amount: Some(12.0),
        tip_amount: Some(2.0),
        airport_fee: Some(0.0),
        congestion_surcharge: Some(2.5),
    }
}

impl Trip {
    pub fn vendor(mut self, vendor_id: Option<i64>) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn distance(mut self, distance: Option<f64>) -> Self {
        self.trip_distance = distance;
        self
    }

    pub fn fare(mut self, fare: Option<f64>) -> Self {
        self.fare_amount = fare;
        self
    }

    pub fn tip(mut self, tip: Option<f64>) -> Self {
        self.tip_amount = tip;
        self
    }

    pub fn locations(mut self, pickup: Option<i64>, dropoff: Option<i64>) -> Self {
        self.pickup_location_id = pickup;
        self.dropoff_location_id = dropoff;
        self
    }

    pub fn payment(mut self, payment_id: Option<i64>) -> Self {
        self.payment_id = payment_id;
        self
    }

    pub fn ratecode(mut self, ratecode_id: Option<i64>) -> Self {
        self.ratecode_id = ratecode_id;
        self
    }
}

fn micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

fn datetime_column(name: &str, values: Vec<i64>) -> Column {
    Series::new(name.into(), values)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
        .expect("datetime cast")
        .into()
}

fn float_column(name: &str, trips: &[Trip], value: impl Fn(&Trip) -> Option<f64>) -> Column {
    Series::new(name.into(), trips.iter().map(value).collect::<Vec<_>>()).into()
}

fn int_column(name: &str, trips: &[Trip], value: impl Fn(&Trip) -> Option<i64>) -> Column {
    Series::new(name.into(), trips.iter().map(value).collect::<Vec<_>>()).into()
}

/// Builds a trip records table in the canonical loaded schema.
pub fn trips_frame(trips: &[Trip]) -> DataFrame {
    let pickups: Vec<i64> = trips.iter().map(|t| micros(t.pickup)).collect();
    let dropoffs: Vec<i64> = trips
        .iter()
        .map(|t| micros(t.pickup + Duration::minutes(t.minutes)))
        .collect();

    let columns = vec![
        int_column("vendor_id", trips, |t| t.vendor_id),
        datetime_column("pickup_datetime", pickups),
        datetime_column("dropoff_datetime", dropoffs),
        int_column("passenger_count", trips, |t| t.passenger_count),
        float_column("trip_distance", trips, |t| t.trip_distance),
        int_column("ratecode_id", trips, |t| t.ratecode_id),
        Series::new(
            "store_and_fwd".into(),
            trips.iter().map(|t| t.store_and_fwd).collect::<Vec<_>>(),
        )
        .into(),
        int_column("pickup_location_id", trips, |t| t.pickup_location_id),
        int_column("dropoff_location_id", trips, |t| t.dropoff_location_id),
        int_column("payment_id", trips, |t| t.payment_id),
        float_column("fare_amount", trips, |t| t.fare_amount),
        float_column("extra", trips, |_| Some(0.0)),
        float_column("mta_tax", trips, |_| Some(0.5)),
        float_column("tip_amount", trips, |t| t.tip_amount),
        float_column("tolls_amount", trips, |_| Some(0.0)),
        float_column("improvement_surcharge", trips, |_| Some(1.0)),
        float_column("total_amount", trips, |t| {
            Some(t.fare_amount.unwrap_or(0.0) + t.tip_amount.unwrap_or(0.0) + 4.0)
        }),
        float_column("congestion_surcharge", trips, |t| t.congestion_surcharge),
        float_column("airport_fee", trips, |t| t.airport_fee),
        float_column("cbd_congestion_fee", trips, |_| Some(0.0)),
    ];
    DataFrame::new(columns).expect("trip frame")
}

pub fn zones_frame() -> DataFrame {
    df!(
        "location_id" => [1_i64, 2, 3, 264],
        "borough" => ["EWR", "Queens", "Bronx", "Unknown"],
        "zone" => ["Newark Airport", "Jamaica Bay", "Allerton/Pelham Gardens", "N/A"],
        "service_zone" => ["EWR", "Boro Zone", "Boro Zone", "N/A"]
    )
    .expect("zones frame")
}

pub fn i64_values(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
    df.column(name)
        .expect("column")
        .i64()
        .expect("i64 column")
        .into_iter()
        .collect()
}

pub fn f64_values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
    df.column(name)
        .expect("column")
        .f64()
        .expect("f64 column")
        .into_iter()
        .collect()
}

pub fn str_values(df: &DataFrame, name: &str) -> Vec<Option<String>> {
    df.column(name)
        .expect("column")
        .str()
        .expect("string column")
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect()
}
