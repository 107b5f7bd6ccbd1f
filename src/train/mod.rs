//! コマンドラインから呼ぶ処理。checkは全レイヤーの微分の検証、classifyは分類の学習
pub mod check;
pub mod classify;
